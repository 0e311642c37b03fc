use async_trait::async_trait;
use course_core::model::{ModuleId, Progress, StepId, UserId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::document;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid field path: {0}")]
    InvalidPath(String),
}

//
// ─── FIELD PATHS ───────────────────────────────────────────────────────────────
//

/// Location of one field inside a progress document, rendered with dots
/// (`moduleProgress.1.stepStates.2.videoWatched`).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Top-level field such as `currentModule`.
    #[must_use]
    pub fn root(field: &str) -> Self {
        Self {
            segments: vec![field.to_owned()],
        }
    }

    /// `moduleProgress.<module>.<field>`
    #[must_use]
    pub fn module(module: ModuleId, field: &str) -> Self {
        Self {
            segments: vec![
                "moduleProgress".to_owned(),
                module.to_string(),
                field.to_owned(),
            ],
        }
    }

    /// `moduleProgress.<module>.stepStates.<step>.<field>`
    #[must_use]
    pub fn step(module: ModuleId, step: StepId, field: &str) -> Self {
        Self {
            segments: vec![
                "moduleProgress".to_owned(),
                module.to_string(),
                "stepStates".to_owned(),
                step.to_string(),
                field.to_owned(),
            ],
        }
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

impl FromStr for FieldPath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('.').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(StorageError::InvalidPath(s.to_owned()));
        }
        Ok(Self { segments })
    }
}

/// How a `FieldWrite` combines with the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldOp {
    /// Replace the stored value. `Value::Null` removes the field.
    #[default]
    Set,
    /// Append the array elements that are not stored yet.
    ArrayUnion,
    /// Keep the larger of the stored and the written number.
    Max,
}

/// One change to the field at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub path: FieldPath,
    pub value: Value,
    pub op: FieldOp,
}

impl FieldWrite {
    #[must_use]
    pub fn new(path: FieldPath, value: impl Into<Value>) -> Self {
        Self {
            path,
            value: value.into(),
            op: FieldOp::Set,
        }
    }

    #[must_use]
    pub fn clear(path: FieldPath) -> Self {
        Self::new(path, Value::Null)
    }

    /// Add `elements` to the array at `path`, leaving stored elements in place.
    #[must_use]
    pub fn array_union(path: FieldPath, elements: Vec<Value>) -> Self {
        Self {
            path,
            value: Value::Array(elements),
            op: FieldOp::ArrayUnion,
        }
    }

    /// Raise the number at `path` to `value` unless it is already larger.
    #[must_use]
    pub fn max(path: FieldPath, value: impl Into<Value>) -> Self {
        Self {
            path,
            value: value.into(),
            op: FieldOp::Max,
        }
    }
}

//
// ─── SNAPSHOTS & SUBSCRIPTIONS ─────────────────────────────────────────────────
//

/// A stored progress document and the store's revision for it.
///
/// Revisions increase with every accepted write for the same user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub revision: u64,
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub(crate) struct ProgressChange {
    pub(crate) user: UserId,
    pub(crate) snapshot: RemoteSnapshot,
}

/// Live feed of one user's document. Dropping it unsubscribes.
pub struct ProgressSubscription {
    user: UserId,
    receiver: broadcast::Receiver<ProgressChange>,
}

impl ProgressSubscription {
    pub(crate) fn new(user: UserId, receiver: broadcast::Receiver<ProgressChange>) -> Self {
        Self { user, receiver }
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Waits for the next snapshot of this user's document.
    ///
    /// Returns `None` once the store shuts down. When the subscriber falls
    /// behind, skipped snapshots are dropped; every snapshot is a whole
    /// document, so the next one received supersedes them.
    pub async fn recv(&mut self) -> Option<RemoteSnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.user == self.user => return Some(change.snapshot),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user = %self.user, skipped, "progress subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for ProgressSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSubscription")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

//
// ─── REPOSITORY CONTRACT ───────────────────────────────────────────────────────
//

/// Remote persistence for per-user progress documents.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the stored document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store is unreachable or the document cannot be decoded.
    /// A user without a document yields `Ok(None)`.
    async fn get_progress(&self, user: &UserId) -> Result<Option<RemoteSnapshot>, StorageError>;

    /// Deep-merge `progress` into the stored document, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write is rejected.
    async fn set_progress(&self, user: &UserId, progress: &Progress) -> Result<u64, StorageError>;

    /// Apply `writes` in order as one atomic change. Missing parents are created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write is rejected; nothing is applied in that case.
    async fn update_fields(&self, user: &UserId, writes: &[FieldWrite])
    -> Result<u64, StorageError>;

    /// Subscribe to every later change of the user's document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store is unreachable.
    async fn subscribe(&self, user: &UserId) -> Result<ProgressSubscription, StorageError>;
}

//
// ─── IN-MEMORY STORE ───────────────────────────────────────────────────────────
//

#[derive(Debug)]
struct StoredDocument {
    document: Value,
    revision: u64,
}

#[derive(Debug)]
struct InMemoryState {
    documents: HashMap<UserId, StoredDocument>,
    applied: HashMap<UserId, Vec<Vec<FieldWrite>>>,
    available: bool,
    latency: Duration,
}

/// In-memory progress store for tests and prototyping.
///
/// Can simulate an outage: while unavailable every call fails with
/// `StorageError::Connection`. A configured latency delays every call.
#[derive(Clone)]
pub struct InMemoryProgressStore {
    state: Arc<Mutex<InMemoryState>>,
    changes: broadcast::Sender<ProgressChange>,
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(InMemoryState {
                documents: HashMap::new(),
                applied: HashMap::new(),
                available: true,
                latency: Duration::ZERO,
            })),
            changes,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn lock_online(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, StorageError> {
        let guard = self.lock()?;
        if guard.available {
            Ok(guard)
        } else {
            Err(StorageError::Connection("store unavailable".into()))
        }
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut guard) = self.state.lock() {
            guard.available = available;
        }
    }

    /// Delay every later call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.state.lock() {
            guard.latency = latency;
        }
    }

    async fn delay(&self) {
        let latency = self
            .state
            .lock()
            .map(|guard| guard.latency)
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.lock().map(|guard| guard.available).unwrap_or(false)
    }

    /// Raw stored document, for inspection.
    #[must_use]
    pub fn document(&self, user: &UserId) -> Option<Value> {
        let guard = self.state.lock().ok()?;
        guard.documents.get(user).map(|stored| stored.document.clone())
    }

    /// Every accepted `update_fields` batch for `user`, oldest first.
    #[must_use]
    pub fn applied_writes(&self, user: &UserId) -> Vec<Vec<FieldWrite>> {
        self.state
            .lock()
            .ok()
            .and_then(|guard| guard.applied.get(user).cloned())
            .unwrap_or_default()
    }

    fn write(
        &self,
        user: &UserId,
        edit: impl FnOnce(&mut Value) -> Result<(), StorageError>,
    ) -> Result<RemoteSnapshot, StorageError> {
        let mut guard = self.lock_online()?;
        let (mut document, revision) = guard
            .documents
            .get(user)
            .map_or((Value::Null, 0), |stored| {
                (stored.document.clone(), stored.revision)
            });

        edit(&mut document)?;
        let progress = document::decode(&document)?;
        let revision = revision + 1;
        guard.documents.insert(
            user.clone(),
            StoredDocument {
                document,
                revision,
            },
        );

        let snapshot = RemoteSnapshot { revision, progress };
        // Published under the lock so subscribers observe revisions in order.
        let _ = self.changes.send(ProgressChange {
            user: user.clone(),
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryProgressStore {
    async fn get_progress(&self, user: &UserId) -> Result<Option<RemoteSnapshot>, StorageError> {
        self.delay().await;
        let guard = self.lock_online()?;
        guard
            .documents
            .get(user)
            .map(|stored| {
                document::decode(&stored.document).map(|progress| RemoteSnapshot {
                    revision: stored.revision,
                    progress,
                })
            })
            .transpose()
    }

    async fn set_progress(&self, user: &UserId, progress: &Progress) -> Result<u64, StorageError> {
        self.delay().await;
        let patch = document::encode(progress)?;
        let snapshot = self.write(user, |doc| {
            document::merge_progress(doc, patch);
            Ok(())
        })?;
        Ok(snapshot.revision)
    }

    async fn update_fields(
        &self,
        user: &UserId,
        writes: &[FieldWrite],
    ) -> Result<u64, StorageError> {
        self.delay().await;
        let snapshot = self.write(user, |doc| document::apply_writes(doc, writes))?;
        if let Ok(mut guard) = self.lock() {
            guard
                .applied
                .entry(user.clone())
                .or_default()
                .push(writes.to_vec());
        }
        Ok(snapshot.revision)
    }

    async fn subscribe(&self, user: &UserId) -> Result<ProgressSubscription, StorageError> {
        let _guard = self.lock_online()?;
        Ok(ProgressSubscription::new(
            user.clone(),
            self.changes.subscribe(),
        ))
    }
}

/// Storage backends behind a trait object for easy swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_progress(Arc::new(InMemoryProgressStore::new()))
    }

    #[must_use]
    pub fn with_progress(progress: Arc<dyn ProgressRepository>) -> Self {
        Self { progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::StepStatePatch;
    use course_core::step_state::create_quiz_answer;
    use course_core::time::fixed_now;
    use serde_json::json;

    fn user() -> UserId {
        UserId::new("learner-1")
    }

    #[test]
    fn field_paths_render_with_dots() {
        let path = FieldPath::step(ModuleId::new(1), StepId::new(2), "videoWatched");
        assert_eq!(path.to_string(), "moduleProgress.1.stepStates.2.videoWatched");
        assert_eq!("moduleProgress.1.stepStates.2.videoWatched".parse::<FieldPath>().unwrap(), path);
        assert!("a..b".parse::<FieldPath>().is_err());
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let store = InMemoryProgressStore::new();
        assert!(store.get_progress(&user()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn field_writes_create_parents_and_bump_revision() {
        let store = InMemoryProgressStore::new();
        let first = store
            .update_fields(
                &user(),
                &[FieldWrite::new(
                    FieldPath::step(ModuleId::new(1), StepId::new(1), "videoWatched"),
                    true,
                )],
            )
            .await
            .unwrap();
        let second = store
            .update_fields(&user(), &[FieldWrite::new(FieldPath::root("currentStep"), 2)])
            .await
            .unwrap();
        assert!(second > first);

        let snapshot = store.get_progress(&user()).await.unwrap().unwrap();
        assert_eq!(snapshot.revision, second);
        assert_eq!(snapshot.progress.current_step(), StepId::new(2));
        let module = snapshot.progress.module(ModuleId::new(1)).unwrap();
        assert!(module.completed_steps().contains(&StepId::new(1)));
        assert_eq!(store.applied_writes(&user()).len(), 2);
    }

    #[tokio::test]
    async fn set_progress_merges_into_existing_document() {
        let store = InMemoryProgressStore::new();
        store
            .update_fields(
                &user(),
                &[FieldWrite::new(
                    FieldPath::step(ModuleId::new(2), StepId::new(1), "pdfDownloaded"),
                    true,
                )],
            )
            .await
            .unwrap();

        let mut local = Progress::new(fixed_now());
        local.apply_step_patch(
            ModuleId::new(1),
            StepId::new(1),
            &StepStatePatch::new().completed(true),
            fixed_now(),
        );
        store.set_progress(&user(), &local).await.unwrap();

        let doc = store.document(&user()).unwrap();
        assert_eq!(doc["moduleProgress"]["2"]["stepStates"]["1"]["pdfDownloaded"], json!(true));
        assert_eq!(doc["moduleProgress"]["1"]["stepStates"]["1"]["completed"], json!(true));
    }

    #[tokio::test]
    async fn stale_full_push_keeps_remote_answers_and_completions() {
        let store = InMemoryProgressStore::new();
        let mut remote = Progress::new(fixed_now());
        remote.apply_step_patch(
            ModuleId::new(1),
            StepId::new(1),
            &StepStatePatch::new()
                .quiz_answer(create_quiz_answer(Some(2), true, 1, fixed_now()))
                .completed(true),
            fixed_now(),
        );
        remote.complete_module(ModuleId::new(1), fixed_now());
        store.set_progress(&user(), &remote).await.unwrap();

        let mut stale = Progress::new(fixed_now());
        stale.apply_step_patch(
            ModuleId::new(1),
            StepId::new(1),
            &StepStatePatch::new().video_watched(true),
            fixed_now(),
        );
        stale.complete_module(ModuleId::new(2), fixed_now());
        store.set_progress(&user(), &stale).await.unwrap();

        let snapshot = store.get_progress(&user()).await.unwrap().unwrap();
        let step = snapshot.progress.step(ModuleId::new(1), StepId::new(1)).unwrap();
        assert!(step.quiz_answer().is_some_and(|answer| answer.is_correct()));
        assert!(step.video_watched());
        assert!(snapshot.progress.is_module_completed(ModuleId::new(1)));
        assert!(snapshot.progress.is_module_completed(ModuleId::new(2)));
    }

    #[tokio::test]
    async fn outage_rejects_calls() {
        let store = InMemoryProgressStore::new();
        store.set_available(false);
        let err = store
            .update_fields(&user(), &[FieldWrite::new(FieldPath::root("currentStep"), 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
        assert!(store.document(&user()).is_none());

        store.set_available(true);
        assert!(store.get_progress(&user()).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_only_see_their_user() {
        let store = InMemoryProgressStore::new();
        let mut subscription = store.subscribe(&user()).await.unwrap();

        store
            .update_fields(
                &UserId::new("someone-else"),
                &[FieldWrite::new(FieldPath::root("currentStep"), 3)],
            )
            .await
            .unwrap();
        let revision = store
            .update_fields(&user(), &[FieldWrite::new(FieldPath::root("currentStep"), 2)])
            .await
            .unwrap();

        let snapshot = subscription.recv().await.unwrap();
        assert_eq!(snapshot.revision, revision);
        assert_eq!(snapshot.progress.current_step(), StepId::new(2));
    }
}
