//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::ModuleId;
use course_core::schedule::WeekLockInfo;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors reported by explicit sync requests (`sync_now`, `force_sync`).
///
/// Mutations never return these; they are recorded in `SyncStatus` instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("offline; changes stay queued")]
    Offline,
    #[error("progress store is closed")]
    Closed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by a learner session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("module {0} is not in the catalog")]
    UnknownModule(ModuleId),
    #[error("module {module} needs module {requires} to be completed first")]
    ModuleLocked { module: ModuleId, requires: ModuleId },
    #[error("module {}: {}", .0.week_id, .0.countdown_text)]
    TimeLocked(Box<WeekLockInfo>),
}

/// Failure reported by a navigation observer. The engine turns it into an error event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ObserverError(pub String);

/// Errors emitted while bootstrapping course services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CourseServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
