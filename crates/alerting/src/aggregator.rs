//! Alert Aggregator
//!
//! Alerts from every source are queued here and sent out in batches. The
//! queue lives behind a single async mutex together with the flush
//! bookkeeping; the guard covers the in-memory update and the local store
//! mirror, and is released before any subscriber is contacted.
//!
//! Queued alerts are never dropped: a flush that cannot deliver (not due, no
//! subscribers) leaves the queue as it was.

use crate::error::AlertError;
use crate::sink::{Attachment, NotificationSink};
use crate::subscribers::Subscribers;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use storage::{KvStore, KvStoreExt, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const PENDING_KEY: &str = "pending:alerts";
const LAST_PUSH_KEY: &str = "alerts:lastPush";
const LAST_COUNTS_KEY: &str = "alerts:lastCounts";
const HISTORY_KEY: &str = "history";
const LAST_REPORT_KEY: &str = "last:report";
const LAST_REPORT_ID_KEY: &str = "last:report:id";
const RECENT_REPORTS_KEY: &str = "reports:recent";

/// Aggregator configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Minimum time between two unforced flushes
    pub flush_interval: Duration,
    /// Batches larger than this are summarized and get a report
    pub digest_threshold: usize,
    /// Length of the recent-reports list
    pub recent_reports: usize,
    /// Length of the alert history
    pub history_limit: usize,
    /// Example entries in a digest are cut to this many characters
    pub example_chars: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(300),
            digest_threshold: 5,
            recent_reports: 20,
            history_limit: 40,
            example_chars: 140,
        }
    }
}

/// Per-category message counts of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CategoryCounts {
    pub fetch_failures: usize,
    pub lagging: usize,
    pub indexing_errors: usize,
    pub recoveries: usize,
    pub rotations: usize,
    pub drops: usize,
    pub analyses: usize,
}

impl CategoryCounts {
    pub fn tally(messages: &[String]) -> Self {
        let mut counts = Self::default();
        for message in messages {
            let lower = message.to_lowercase();
            if message.starts_with('❌') {
                counts.fetch_failures += 1;
            } else if message.starts_with('🔴') {
                counts.lagging += 1;
            } else if message.starts_with('⚠') {
                counts.indexing_errors += 1;
            } else if message.starts_with('🟢') {
                counts.recoveries += 1;
            }
            if lower.contains("rotated") {
                counts.rotations += 1;
            }
            if lower.contains("fell") || message.contains('↓') {
                counts.drops += 1;
            }
            if message.starts_with("Analysis ") {
                counts.analyses += 1;
            }
        }
        counts
    }
}

fn is_rotation(message: &str) -> bool {
    message.to_lowercase().contains("rotated")
}

/// Full text of a large batch, addressable by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One delivered alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    pub message: String,
}

/// Why a flush did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Flush interval has not elapsed
    NotDue,
    /// Nothing queued
    Empty,
    /// Nobody to deliver to; alerts stay queued
    NoSubscribers,
}

/// Result of a flush attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    Skipped { reason: SkipReason },
    Flushed {
        messages: usize,
        delivered: usize,
        failed: usize,
        report_id: Option<String>,
    },
}

struct QueueState {
    pending: Vec<String>,
    last_flush: Option<DateTime<Utc>>,
    last_counts: CategoryCounts,
}

/// Text prepared for one flush
struct Batch {
    summary: String,
    report: Option<Report>,
}

/// Guarded alert queue with rate-limited flushing
pub struct AlertAggregator {
    store: Arc<dyn KvStore>,
    subscribers: Subscribers,
    config: AggregatorConfig,
    queue: Mutex<QueueState>,
}

impl AlertAggregator {
    /// Create an aggregator, restoring queued alerts and flush bookkeeping
    /// from the store
    pub async fn load(store: Arc<dyn KvStore>, config: AggregatorConfig) -> Result<Self, AlertError> {
        let pending: Vec<String> = store.get_json(PENDING_KEY).await?.unwrap_or_default();
        let last_flush = store
            .get_json::<i64>(LAST_PUSH_KEY)
            .await?
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        let last_counts = store.get_json(LAST_COUNTS_KEY).await?.unwrap_or_default();

        if !pending.is_empty() {
            info!(count = pending.len(), "Restored queued alerts");
        }
        gauge!("monitor_pending_alerts").set(pending.len() as f64);

        Ok(Self {
            subscribers: Subscribers::new(store.clone()),
            store,
            config,
            queue: Mutex::new(QueueState {
                pending,
                last_flush,
                last_counts,
            }),
        })
    }

    /// Subscriber list this aggregator delivers to
    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    /// Append alerts to the queue; returns the new queue length
    pub async fn enqueue(&self, messages: Vec<String>) -> usize {
        let mut queue = self.queue.lock().await;
        if messages.is_empty() {
            return queue.pending.len();
        }

        let added = messages.len();
        queue.pending.extend(messages);
        if let Err(e) = self.store.set_json(PENDING_KEY, &queue.pending).await {
            warn!(error = %e, "Failed to mirror alert queue");
        }

        counter!("monitor_alerts_enqueued_total").increment(added as u64);
        gauge!("monitor_pending_alerts").set(queue.pending.len() as f64);
        debug!(added, pending = queue.pending.len(), "Alerts queued");
        queue.pending.len()
    }

    /// Send the queued alerts if strictly more than the flush interval has
    /// passed since the last flush, or
    /// unconditionally when `force` is set.
    ///
    /// Delivery is best effort: a failing subscriber is logged and does not
    /// keep the batch queued.
    pub async fn flush(&self, sink: &dyn NotificationSink, force: bool) -> Result<FlushOutcome, AlertError> {
        let now = Utc::now();

        let (messages, subscribers, batch) = {
            let mut queue = self.queue.lock().await;

            if !force && !is_due(queue.last_flush, now, self.config.flush_interval) {
                return Ok(skipped(SkipReason::NotDue));
            }
            if queue.pending.is_empty() {
                return Ok(skipped(SkipReason::Empty));
            }
            let subscribers = self.subscribers.list().await?;
            if subscribers.is_empty() {
                debug!(pending = queue.pending.len(), "No subscribers, keeping alerts queued");
                return Ok(skipped(SkipReason::NoSubscribers));
            }

            let messages = std::mem::take(&mut queue.pending);
            let counts = CategoryCounts::tally(&messages);
            let batch = self.compose(&messages, &counts, &queue.last_counts, now);

            if let Some(report) = &batch.report {
                self.save_report(report).await;
            }
            self.append_history(&messages, now).await;

            queue.last_flush = Some(now);
            queue.last_counts = counts;
            self.save_flush_state(&queue).await;
            gauge!("monitor_pending_alerts").set(0.0);

            (messages, subscribers, batch)
        };

        let attachment = batch.report.as_ref().map(|r| Attachment {
            report_id: r.id.clone(),
        });
        let results = join_all(
            subscribers
                .iter()
                .map(|subscriber| sink.send(subscriber, &batch.summary, attachment.as_ref())),
        )
        .await;

        let mut failed = 0;
        for (subscriber, result) in subscribers.iter().zip(&results) {
            if let Err(e) = result {
                failed += 1;
                error!(subscriber = %subscriber, error = %e, "Send failed");
            }
        }

        counter!("monitor_flushes_total").increment(1);
        info!(
            messages = messages.len(),
            subscribers = subscribers.len(),
            failed,
            report = attachment.as_ref().map(|a| a.report_id.as_str()),
            "Alerts flushed"
        );

        Ok(FlushOutcome::Flushed {
            messages: messages.len(),
            delivered: subscribers.len() - failed,
            failed,
            report_id: attachment.map(|a| a.report_id),
        })
    }

    /// Snapshot of the queued alerts
    pub async fn pending(&self) -> Vec<String> {
        self.queue.lock().await.pending.clone()
    }

    /// Time of the last flush that took a batch
    pub async fn last_flush(&self) -> Option<DateTime<Utc>> {
        self.queue.lock().await.last_flush
    }

    /// Delivered alerts, oldest first
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, AlertError> {
        Ok(self.store.get_json(HISTORY_KEY).await?.unwrap_or_default())
    }

    pub async fn report(&self, id: &str) -> Result<Option<Report>, AlertError> {
        Ok(self.store.get_json(&report_key(id)).await?)
    }

    pub async fn latest_report(&self) -> Result<Option<Report>, AlertError> {
        match self.store.get_json::<String>(LAST_REPORT_ID_KEY).await? {
            Some(id) => self.report(&id).await,
            None => Ok(None),
        }
    }

    /// Recent report ids, newest first
    pub async fn recent_reports(&self) -> Result<Vec<String>, AlertError> {
        Ok(self.store.get_json(RECENT_REPORTS_KEY).await?.unwrap_or_default())
    }

    fn compose(
        &self,
        messages: &[String],
        counts: &CategoryCounts,
        previous: &CategoryCounts,
        now: DateTime<Utc>,
    ) -> Batch {
        let detail = messages
            .iter()
            .map(|m| format!("• {m}"))
            .collect::<Vec<_>>()
            .join("\n");

        if messages.len() <= self.config.digest_threshold {
            return Batch {
                summary: detail,
                report: None,
            };
        }

        let id = report_id(now);
        let rotation_delta = counts.rotations as i64 - previous.rotations as i64;
        let mut summary = format!(
            "{} events. Fetch failures: {}, Lagging: {}, Indexing errors: {}, Recovered: {}, \
             Identity changes: {} (Δ {:+}), Drops: {}, Analysis: {}.",
            messages.len(),
            counts.fetch_failures,
            counts.lagging,
            counts.indexing_errors,
            counts.recoveries,
            counts.rotations,
            rotation_delta,
            counts.drops,
            counts.analyses,
        );

        // Rotations make the best examples; otherwise the oldest entries
        let mut examples: Vec<&String> = messages.iter().filter(|m| is_rotation(m)).take(2).collect();
        if examples.is_empty() {
            examples = messages.iter().take(2).collect();
        }
        summary.push_str("\nExamples:");
        for example in examples {
            let cut: String = example.chars().take(self.config.example_chars).collect();
            summary.push_str(&format!("\n• {cut}"));
        }
        summary.push_str(&format!("\nFull report: {id}"));

        Batch {
            summary,
            report: Some(Report {
                id,
                body: detail,
                created_at: now,
            }),
        }
    }

    async fn save_report(&self, report: &Report) {
        let result: Result<(), StorageError> = async {
            self.store.set_json(&report_key(&report.id), report).await?;
            self.store.set_json(LAST_REPORT_KEY, &report.body).await?;
            self.store.set_json(LAST_REPORT_ID_KEY, &report.id).await?;

            let mut recent: Vec<String> = self.store.get_json(RECENT_REPORTS_KEY).await?.unwrap_or_default();
            recent.insert(0, report.id.clone());
            recent.truncate(self.config.recent_reports);
            self.store.set_json(RECENT_REPORTS_KEY, &recent).await
        }
        .await;

        if let Err(e) = result {
            warn!(report = %report.id, error = %e, "Failed to store report");
        }
    }

    async fn append_history(&self, messages: &[String], now: DateTime<Utc>) {
        let result: Result<(), StorageError> = async {
            let mut history: Vec<HistoryEntry> = self.store.get_json(HISTORY_KEY).await?.unwrap_or_default();
            history.extend(messages.iter().map(|message| HistoryEntry {
                ts: now,
                message: message.clone(),
            }));
            let excess = history.len().saturating_sub(self.config.history_limit);
            history.drain(..excess);
            self.store.set_json(HISTORY_KEY, &history).await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to append alert history");
        }
    }

    async fn save_flush_state(&self, queue: &QueueState) {
        let result: Result<(), StorageError> = async {
            self.store.set_json(PENDING_KEY, &queue.pending).await?;
            if let Some(last) = queue.last_flush {
                self.store.set_json(LAST_PUSH_KEY, &last.timestamp_millis()).await?;
            }
            self.store.set_json(LAST_COUNTS_KEY, &queue.last_counts).await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to persist flush state");
        }
    }
}

fn skipped(reason: SkipReason) -> FlushOutcome {
    debug!(?reason, "Flush skipped");
    FlushOutcome::Skipped { reason }
}

fn is_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        None => true,
        // A clock that went backwards counts as due rather than stalling
        Some(last) => (now - last).to_std().map_or(true, |elapsed| elapsed > interval),
    }
}

fn report_key(id: &str) -> String {
    format!("report:{id}")
}

/// `rep-<ms>-<6 hex>`
fn report_id(now: DateTime<Utc>) -> String {
    format!("rep-{}-{:06x}", now.timestamp_millis(), rand::random::<u32>() & 0xff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use storage::MemoryStore;

    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<(String, String, Option<Attachment>)>>,
        fail_for: Option<String>,
    }

    impl RecordingSink {
        fn failing_for(subscriber: &str) -> Self {
            Self {
                fail_for: Some(subscriber.to_string()),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<(String, String, Option<Attachment>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(
            &self,
            subscriber: &str,
            text: &str,
            attachment: Option<&Attachment>,
        ) -> Result<(), AlertError> {
            if self.fail_for.as_deref() == Some(subscriber) {
                return Err(AlertError::DeliveryError {
                    subscriber: subscriber.to_string(),
                    reason: "blocked".to_string(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((subscriber.to_string(), text.to_string(), attachment.cloned()));
            Ok(())
        }
    }

    async fn aggregator_with(subscribers: &[&str]) -> (AlertAggregator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let aggregator = AlertAggregator::load(store.clone(), AggregatorConfig::default())
            .await
            .unwrap();
        for id in subscribers {
            aggregator.subscribers().add(id).await.unwrap();
        }
        (aggregator, store)
    }

    fn messages(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("❌ Source {i}: fetch failed (HTTP 502)")).collect()
    }

    #[tokio::test]
    async fn test_large_batch_produces_report() {
        let (aggregator, store) = aggregator_with(&["1001"]).await;
        let batch = messages(6);
        aggregator.enqueue(batch.clone()).await;

        let sink = RecordingSink::default();
        let outcome = aggregator.flush(&sink, true).await.unwrap();

        let FlushOutcome::Flushed { report_id: Some(id), messages: 6, .. } = outcome.clone() else {
            panic!("unexpected outcome {outcome:?}");
        };
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("6 events. Fetch failures: 6"));
        assert!(sent[0].1.ends_with(&format!("Full report: {id}")));
        assert_eq!(sent[0].2.as_ref().map(|a| a.report_id.as_str()), Some(id.as_str()));

        let report = aggregator.report(&id).await.unwrap().unwrap();
        for message in &batch {
            assert!(report.body.contains(&format!("• {message}")));
        }
        assert_eq!(report.body.lines().count(), 6);
        assert_eq!(aggregator.latest_report().await.unwrap(), Some(report));
        assert_eq!(aggregator.recent_reports().await.unwrap(), vec![id]);

        assert!(aggregator.pending().await.is_empty());
        let mirrored: Vec<String> = store.get_json(PENDING_KEY).await.unwrap().unwrap();
        assert!(mirrored.is_empty());
    }

    #[tokio::test]
    async fn test_small_batch_sent_verbatim() {
        let (aggregator, store) = aggregator_with(&["1001"]).await;
        aggregator
            .enqueue(vec!["🔴 a: lagging 150 blocks".to_string(), "🟢 b: fetch recovered".to_string()])
            .await;

        let sink = RecordingSink::default();
        aggregator.flush(&sink, true).await.unwrap();

        assert_eq!(sink.sent()[0].1, "• 🔴 a: lagging 150 blocks\n• 🟢 b: fetch recovered");
        assert_eq!(sink.sent()[0].2, None);
        assert_eq!(store.get(LAST_REPORT_ID_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_queue() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let sink = RecordingSink::default();

        aggregator.enqueue(messages(1)).await;
        assert!(matches!(
            aggregator.flush(&sink, false).await.unwrap(),
            FlushOutcome::Flushed { .. }
        ));

        aggregator.enqueue(messages(2)).await;
        assert_eq!(
            aggregator.flush(&sink, false).await.unwrap(),
            FlushOutcome::Skipped { reason: SkipReason::NotDue }
        );
        assert_eq!(aggregator.pending().await.len(), 2);

        // Forced flush ignores the interval
        assert!(matches!(
            aggregator.flush(&sink, true).await.unwrap(),
            FlushOutcome::Flushed { messages: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_no_subscribers_accumulates() {
        let (aggregator, _) = aggregator_with(&[]).await;
        let sink = RecordingSink::default();

        aggregator.enqueue(messages(3)).await;
        assert_eq!(
            aggregator.flush(&sink, true).await.unwrap(),
            FlushOutcome::Skipped { reason: SkipReason::NoSubscribers }
        );
        aggregator.enqueue(messages(2)).await;
        assert_eq!(aggregator.pending().await.len(), 5);
        assert_eq!(aggregator.last_flush().await, None);

        aggregator.subscribers().add("1001").await.unwrap();
        let outcome = aggregator.flush(&sink, false).await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Flushed { messages: 5, .. }));
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let sink = RecordingSink::default();
        assert_eq!(
            aggregator.flush(&sink, true).await.unwrap(),
            FlushOutcome::Skipped { reason: SkipReason::Empty }
        );
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_subscriber_does_not_block_others() {
        let (aggregator, _) = aggregator_with(&["1001", "1002", "1003"]).await;
        aggregator.enqueue(messages(2)).await;

        let sink = RecordingSink::failing_for("1002");
        let outcome = aggregator.flush(&sink, true).await.unwrap();

        assert_eq!(
            outcome,
            FlushOutcome::Flushed {
                messages: 2,
                delivered: 2,
                failed: 1,
                report_id: None
            }
        );
        let recipients: Vec<String> = sink.sent().into_iter().map(|(s, _, _)| s).collect();
        assert_eq!(recipients, vec!["1001", "1003"]);
        assert!(aggregator.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let sink = RecordingSink::default();

        aggregator.enqueue(messages(30)).await;
        aggregator.flush(&sink, true).await.unwrap();
        aggregator.enqueue(vec!["🟢 last: fetch recovered".to_string()]).await;
        aggregator.flush(&sink, true).await.unwrap();

        let history = aggregator.history().await.unwrap();
        assert_eq!(history.len(), 31);

        aggregator.enqueue(messages(20)).await;
        aggregator.flush(&sink, true).await.unwrap();
        let history = aggregator.history().await.unwrap();
        assert_eq!(history.len(), 40);
        assert_eq!(history.last().unwrap().message, messages(20)[19]);
    }

    #[tokio::test]
    async fn test_recent_reports_capped_newest_first() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let sink = RecordingSink::default();

        let mut ids = Vec::new();
        for _ in 0..22 {
            aggregator.enqueue(messages(6)).await;
            if let FlushOutcome::Flushed { report_id: Some(id), .. } = aggregator.flush(&sink, true).await.unwrap() {
                ids.push(id);
            }
        }

        let recent = aggregator.recent_reports().await.unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0], ids[21]);
        assert_eq!(recent[19], ids[2]);
    }

    #[tokio::test]
    async fn test_digest_rotation_delta_and_examples() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let sink = RecordingSink::default();

        let mut first = messages(4);
        first.push("Base MM: identity rotated 0xa → 0xb".to_string());
        first.push("Gnosis MM: identity rotated 0xc → 0xd".to_string());
        first.push(format!("Base MM: identity rotated 0x{} → 0xe", "f".repeat(200)));
        aggregator.enqueue(first).await;
        aggregator.flush(&sink, true).await.unwrap();

        let digest = &sink.sent()[0].1;
        assert!(digest.contains("Identity changes: 3 (Δ +3)"));
        assert!(digest.contains("\n• Base MM: identity rotated 0xa → 0xb"));
        assert!(digest.contains("\n• Gnosis MM: identity rotated 0xc → 0xd"));

        let mut second = messages(5);
        second.push("Base MM: identity rotated 0xb → 0xa".to_string());
        second.push("Base MM: value fell 12,500 → 12,000".to_string());
        aggregator.enqueue(second).await;
        aggregator.flush(&sink, true).await.unwrap();

        let digest = &sink.sent()[1].1;
        assert!(digest.contains("Identity changes: 1 (Δ -2), Drops: 1, Analysis: 0."));
    }

    #[tokio::test]
    async fn test_examples_are_truncated() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let sink = RecordingSink::default();
        let long = format!("Analysis {}", "x".repeat(300));
        aggregator.enqueue(vec![long; 6]).await;
        aggregator.flush(&sink, true).await.unwrap();

        let digest = &sink.sent()[0].1;
        let example = digest.lines().find(|l| l.starts_with("• ")).unwrap();
        assert_eq!(example.chars().count(), 2 + 140);
        assert!(digest.contains("Analysis: 6."));
    }

    #[tokio::test]
    async fn test_queue_and_bookkeeping_survive_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let aggregator = AlertAggregator::load(store.clone(), AggregatorConfig::default())
                .await
                .unwrap();
            aggregator.subscribers().add("1001").await.unwrap();
            aggregator.enqueue(messages(1)).await;
            aggregator.flush(&RecordingSink::default(), true).await.unwrap();
            aggregator.enqueue(messages(3)).await;
        }

        let reloaded = AlertAggregator::load(store, AggregatorConfig::default())
            .await
            .unwrap();
        assert_eq!(reloaded.pending().await.len(), 3);
        assert!(reloaded.last_flush().await.is_some());
        // Interval still running after the restart
        assert_eq!(
            reloaded.flush(&RecordingSink::default(), false).await.unwrap(),
            FlushOutcome::Skipped { reason: SkipReason::NotDue }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_and_flush_lose_nothing() {
        let (aggregator, _) = aggregator_with(&["1001"]).await;
        let aggregator = Arc::new(aggregator);
        let sink = Arc::new(RecordingSink::default());

        let mut tasks = Vec::new();
        for task in 0..8 {
            let aggregator = aggregator.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    aggregator.enqueue(vec![format!("🔴 s{task}-{i}: lagging")]).await;
                }
            }));
        }
        for _ in 0..4 {
            let aggregator = aggregator.clone();
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    aggregator.flush(sink.as_ref(), true).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        aggregator.flush(sink.as_ref(), true).await.unwrap();

        let mut delivered = 0;
        for (_, text, attachment) in sink.sent() {
            delivered += match attachment {
                Some(a) => aggregator.report(&a.report_id).await.unwrap().unwrap().body.lines().count(),
                None => text.lines().count(),
            };
        }
        assert_eq!(delivered, 8 * 25);
        assert!(aggregator.pending().await.is_empty());
    }

    #[test]
    fn test_report_id_shape() {
        let id = report_id(Utc::now());
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "rep");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let interval = Duration::from_secs(300);
        assert!(is_due(None, now, interval));
        assert!(!is_due(Some(now - chrono::Duration::seconds(10)), now, interval));
        // Exactly one interval is not enough
        assert!(!is_due(Some(now - chrono::Duration::seconds(300)), now, interval));
        assert!(is_due(Some(now - chrono::Duration::seconds(301)), now, interval));
    }
}
