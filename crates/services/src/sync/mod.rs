//! Offline-first replication of a learner's progress document.
//!
//! Local mutations land in `SyncState` immediately and are queued as field
//! writes; one `SyncEngine` task per learner drains the queue in order and
//! rebases on remote snapshots.

pub(crate) mod engine;
pub(crate) mod mutation;
mod state;

pub(crate) use state::SyncState;
pub use state::SyncStatus;
