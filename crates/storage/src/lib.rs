#![forbid(unsafe_code)]

pub mod document;
pub mod repository;
pub mod sqlite;

pub use repository::{
    FieldOp, FieldPath, FieldWrite, InMemoryProgressStore, ProgressRepository, ProgressSubscription,
    RemoteSnapshot, Storage, StorageError,
};
