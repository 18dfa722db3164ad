//! SQLite Backend

use crate::kv::KvStore;
use crate::samples::{Sample, SampleLog};
use crate::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        name TEXT NOT NULL,
        value REAL NOT NULL,
        indexer TEXT,
        indexer_name TEXT,
        payload TEXT
    )",
    "CREATE INDEX IF NOT EXISTS samples_ts ON samples (ts)",
];

type SampleRow = (String, String, f64, Option<String>, Option<String>, Option<String>);

/// State store and sample log sharing one SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://data/state.sqlite`
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        info!("Opening SQLite store at {}", url);
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single connection so every query sees
    /// the same data
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("timestamp {raw}: {e}")))
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value.to_string())
        .execute(&self.pool)
        .await?;
        debug!(key, "SQLite store write");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SampleLog for SqliteStore {
    async fn append(&self, sample: &Sample) -> Result<(), StorageError> {
        let payload = sample.raw_payload.as_ref().map(|p| p.to_string());
        sqlx::query(
            "INSERT INTO samples (ts, name, value, indexer, indexer_name, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(format_ts(&sample.timestamp))
        .bind(&sample.source_name)
        .bind(sample.metric_value)
        .bind(&sample.identity_id)
        .bind(&sample.identity_name)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StorageError> {
        let rows: Vec<SampleRow> = sqlx::query_as(
            "SELECT ts, name, value, indexer, indexer_name, payload
             FROM samples WHERE ts >= ? AND ts <= ? ORDER BY ts ASC, id ASC",
        )
        .bind(format_ts(&from))
        .bind(format_ts(&to))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(ts, name, value, indexer, indexer_name, payload)| {
                Ok(Sample {
                    timestamp: parse_ts(&ts)?,
                    source_name: name,
                    metric_value: value,
                    identity_id: indexer,
                    identity_name: indexer_name,
                    raw_payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStoreExt;
    use crate::samples::tests::sample_at;
    use serde_json::json;

    #[tokio::test]
    async fn test_kv_upsert_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.set("subs", json!(["a"])).await.unwrap();
        store.set("subs", json!(["a", "b"])).await.unwrap();
        assert_eq!(store.get("subs").await.unwrap(), Some(json!(["a", "b"])));

        store.delete("subs").await.unwrap();
        assert_eq!(store.get("subs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set_json("alerts:lastPush", &1_700_000_000_000i64).await.unwrap();

        let last: Option<i64> = store.get_json("alerts:lastPush").await.unwrap();
        assert_eq!(last, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_sample_log_range_query() {
        let store = SqliteStore::in_memory().await.unwrap();
        for minute in 0..6 {
            let mut sample = sample_at(minute, "Base Registry", 100.0 + minute as f64);
            sample.raw_payload = Some(json!({ "minute": minute }));
            store.append(&sample).await.unwrap();
        }

        let found = store
            .query(sample_at(2, "x", 0.0).timestamp, sample_at(4, "x", 0.0).timestamp)
            .await
            .unwrap();

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].metric_value, 102.0);
        assert_eq!(found[2].raw_payload, Some(json!({ "minute": 4 })));
        assert_eq!(found[1].identity_id.as_deref(), Some("0xindexer"));
    }
}
