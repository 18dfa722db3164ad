//! Subscriber List

use crate::error::AlertError;
use std::sync::Arc;
use storage::{KvStore, KvStoreExt};
use tracing::info;

const SUBSCRIBERS_KEY: &str = "subs";

/// De-duplicated subscriber ids, persisted under `subs`
#[derive(Clone)]
pub struct Subscribers {
    store: Arc<dyn KvStore>,
}

impl Subscribers {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Current subscribers in subscription order
    pub async fn list(&self) -> Result<Vec<String>, AlertError> {
        let stored: Vec<String> = self.store.get_json(SUBSCRIBERS_KEY).await?.unwrap_or_default();
        let mut unique = Vec::with_capacity(stored.len());
        for id in stored {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Ok(unique)
    }

    /// Subscribe; returns `false` if already subscribed
    pub async fn add(&self, id: &str) -> Result<bool, AlertError> {
        let mut subs = self.list().await?;
        if subs.iter().any(|s| s == id) {
            return Ok(false);
        }
        subs.push(id.to_string());
        self.store.set_json(SUBSCRIBERS_KEY, &subs).await?;
        info!(subscriber = id, total = subs.len(), "Subscriber added");
        Ok(true)
    }

    /// Unsubscribe; returns `false` if not subscribed
    pub async fn remove(&self, id: &str) -> Result<bool, AlertError> {
        let mut subs = self.list().await?;
        let before = subs.len();
        subs.retain(|s| s != id);
        if subs.len() == before {
            return Ok(false);
        }
        self.store.set_json(SUBSCRIBERS_KEY, &subs).await?;
        info!(subscriber = id, total = subs.len(), "Subscriber removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage::MemoryStore;

    #[tokio::test]
    async fn test_add_remove() {
        let subs = Subscribers::new(Arc::new(MemoryStore::new()));

        assert!(subs.add("1001").await.unwrap());
        assert!(!subs.add("1001").await.unwrap());
        assert!(subs.add("1002").await.unwrap());
        assert_eq!(subs.list().await.unwrap(), vec!["1001", "1002"]);

        assert!(subs.remove("1001").await.unwrap());
        assert!(!subs.remove("1001").await.unwrap());
        assert_eq!(subs.list().await.unwrap(), vec!["1002"]);
    }

    #[tokio::test]
    async fn test_list_dedups_stored_value() {
        let store = Arc::new(MemoryStore::new());
        store.set("subs", json!(["7", "8", "7"])).await.unwrap();

        let subs = Subscribers::new(store);
        assert_eq!(subs.list().await.unwrap(), vec!["7", "8"]);
    }
}
