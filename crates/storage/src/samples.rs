//! Append-Only Sample Log

use crate::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// One probe observation of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub source_name: String,
    pub metric_value: f64,
    /// Indexer id, or the allocation id when the indexer is unknown
    pub identity_id: Option<String>,
    pub identity_name: Option<String>,
    /// Response body the value was extracted from
    pub raw_payload: Option<serde_json::Value>,
}

/// Long-horizon history of samples, outside the analyzer's rolling window
#[async_trait]
pub trait SampleLog: Send + Sync {
    /// Append a sample
    async fn append(&self, sample: &Sample) -> Result<(), StorageError>;

    /// Samples with `from <= timestamp <= to`, oldest first
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StorageError>;
}

/// In-memory sample log with a retention cap
pub struct MemorySampleLog {
    samples: Mutex<VecDeque<Sample>>,
    max_samples: usize,
}

impl MemorySampleLog {
    /// Create a log keeping at most `max_samples` entries
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(max_samples.min(10_000))),
            max_samples,
        }
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySampleLog {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl SampleLog for MemorySampleLog {
    async fn append(&self, sample: &Sample) -> Result<(), StorageError> {
        let mut samples = self
            .samples
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        // Enforce retention
        while samples.len() >= self.max_samples {
            samples.pop_front();
        }

        debug!(source = %sample.source_name, value = sample.metric_value, "Sample appended");
        samples.push_back(sample.clone());
        Ok(())
    }

    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StorageError> {
        let samples = self
            .samples
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        let mut found: Vec<Sample> = samples
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.timestamp);
        Ok(found)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub(crate) fn sample_at(minute: i64, name: &str, value: f64) -> Sample {
        Sample {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
            source_name: name.to_string(),
            metric_value: value,
            identity_id: Some("0xindexer".to_string()),
            identity_name: None,
            raw_payload: None,
        }
    }

    #[tokio::test]
    async fn test_query_is_inclusive_range() {
        let log = MemorySampleLog::default();
        for minute in 0..5 {
            log.append(&sample_at(minute, "a", minute as f64)).await.unwrap();
        }

        let found = log
            .query(sample_at(1, "a", 0.0).timestamp, sample_at(3, "a", 0.0).timestamp)
            .await
            .unwrap();
        let values: Vec<f64> = found.iter().map(|s| s.metric_value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_retention_limit() {
        let log = MemorySampleLog::new(3);
        for minute in 0..10 {
            log.append(&sample_at(minute, "a", minute as f64)).await.unwrap();
        }

        assert_eq!(log.len(), 3);
        let all = log
            .query(sample_at(0, "a", 0.0).timestamp, sample_at(60, "a", 0.0).timestamp)
            .await
            .unwrap();
        assert_eq!(all[0].metric_value, 7.0);
    }
}
