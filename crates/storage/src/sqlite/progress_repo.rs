use async_trait::async_trait;
use chrono::Utc;
use course_core::model::{Progress, UserId};
use serde_json::Value;
use sqlx::Row;

use crate::document;
use crate::repository::{
    FieldWrite, ProgressChange, ProgressRepository, ProgressSubscription, RemoteSnapshot,
    StorageError,
};

use super::SqliteRepository;

/// Compare-and-swap rounds before a write gives up with `StorageError::Conflict`.
const MAX_WRITE_ROUNDS: usize = 5;

struct StoredRow {
    document: Value,
    revision: u64,
}

impl SqliteRepository {
    async fn load_row(&self, user: &UserId) -> Result<Option<StoredRow>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT document, revision
            FROM progress_documents
            WHERE user_id = ?1
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row
            .try_get("document")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let revision: i64 = row
            .try_get("revision")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let document = serde_json::from_str(&raw)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let revision = u64::try_from(revision)
            .map_err(|_| StorageError::Serialization(format!("negative revision {revision}")))?;

        Ok(Some(StoredRow { document, revision }))
    }

    /// Write one new revision of `user`'s document.
    ///
    /// Runs optimistically: the row is only replaced if nobody wrote it since
    /// it was read, otherwise the edit is reapplied to the fresh document.
    async fn write_document<F>(&self, user: &UserId, edit: F) -> Result<RemoteSnapshot, StorageError>
    where
        F: Fn(&mut Value) -> Result<(), StorageError> + Send + Sync,
    {
        for round in 0..MAX_WRITE_ROUNDS {
            let current = self.load_row(user).await?;
            let (mut doc, previous) = match current {
                Some(row) => (row.document, Some(row.revision)),
                None => (Value::Null, None),
            };

            edit(&mut doc)?;
            let progress = document::decode(&doc)?;
            let revision = previous.unwrap_or(0) + 1;
            let raw = serde_json::to_string(&doc)
                .map_err(|err| StorageError::Serialization(err.to_string()))?;
            let revision_db = i64::try_from(revision)
                .map_err(|_| StorageError::Serialization("revision overflow".into()))?;

            let result = match previous {
                Some(previous) => {
                    let previous_db = i64::try_from(previous)
                        .map_err(|_| StorageError::Serialization("revision overflow".into()))?;
                    sqlx::query(
                        r"
                        UPDATE progress_documents
                        SET document = ?1, revision = ?2, updated_at = ?3
                        WHERE user_id = ?4 AND revision = ?5
                        ",
                    )
                    .bind(raw.as_str())
                    .bind(revision_db)
                    .bind(Utc::now())
                    .bind(user.as_str())
                    .bind(previous_db)
                    .execute(&self.pool)
                    .await
                }
                None => {
                    sqlx::query(
                        r"
                        INSERT INTO progress_documents (user_id, document, revision, updated_at)
                        VALUES (?1, ?2, ?3, ?4)
                        ON CONFLICT(user_id) DO NOTHING
                        ",
                    )
                    .bind(user.as_str())
                    .bind(raw.as_str())
                    .bind(revision_db)
                    .bind(Utc::now())
                    .execute(&self.pool)
                    .await
                }
            }
            .map_err(|err| StorageError::Connection(err.to_string()))?;

            if result.rows_affected() == 1 {
                let snapshot = RemoteSnapshot { revision, progress };
                let _ = self.changes.send(ProgressChange {
                    user: user.clone(),
                    snapshot: snapshot.clone(),
                });
                return Ok(snapshot);
            }
            tracing::debug!(%user, round, "progress document changed concurrently, retrying");
        }

        Err(StorageError::Conflict)
    }
}

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(&self, user: &UserId) -> Result<Option<RemoteSnapshot>, StorageError> {
        let Some(row) = self.load_row(user).await? else {
            return Ok(None);
        };
        let progress = document::decode(&row.document)?;
        Ok(Some(RemoteSnapshot {
            revision: row.revision,
            progress,
        }))
    }

    async fn set_progress(&self, user: &UserId, progress: &Progress) -> Result<u64, StorageError> {
        let patch = document::encode(progress)?;
        let snapshot = self
            .write_document(user, |doc| {
                document::merge_progress(doc, patch.clone());
                Ok(())
            })
            .await?;
        Ok(snapshot.revision)
    }

    async fn update_fields(
        &self,
        user: &UserId,
        writes: &[FieldWrite],
    ) -> Result<u64, StorageError> {
        let snapshot = self
            .write_document(user, |doc| document::apply_writes(doc, writes))
            .await?;
        Ok(snapshot.revision)
    }

    async fn subscribe(&self, user: &UserId) -> Result<ProgressSubscription, StorageError> {
        Ok(ProgressSubscription::new(
            user.clone(),
            self.changes.subscribe(),
        ))
    }
}
