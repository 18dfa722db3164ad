//! Key/Value State Store

use crate::StorageError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Point reads and writes with last-write-wins semantics
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` if the key was never written
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Typed helpers over [`KvStore`]
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Read and deserialize a value
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value
    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.set(key, serde_json::to_value(value)?).await
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// In-memory store, used in tests and when no database is configured
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        debug!(key, "Memory store write");
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Flags {
        lagging: bool,
        count: u32,
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = MemoryStore::new();
        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
        store.delete("absent").await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_roundtrip_through_dyn() {
        let store: Box<dyn KvStore> = Box::new(MemoryStore::new());
        let flags = Flags {
            lagging: true,
            count: 3,
        };

        store.set_json("flags", &flags).await.unwrap();
        let back: Option<Flags> = store.get_json("flags").await.unwrap();
        assert_eq!(back, Some(flags));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_serialization_error() {
        let store = MemoryStore::new();
        store.set("flags", json!("oops")).await.unwrap();

        let result: Result<Option<Flags>, _> = store.get_json("flags").await;
        assert!(matches!(result, Err(StorageError::SerializationError(_))));
    }
}
