//! Storage Layer
//!
//! Durable key/value state and the append-only sample log, behind narrow
//! traits so the monitor can run on SQLite or entirely in memory.

mod kv;
mod samples;
mod sqlite;

pub use kv::{KvStore, KvStoreExt, MemoryStore};
pub use samples::{MemorySampleLog, Sample, SampleLog};
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
