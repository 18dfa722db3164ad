//! Poll Cycle

use crate::error::SchedulerError;
use crate::metrics;
use alerting::{
    AlertAggregator, AlertStateMachine, CounterSnapshot, FlushOutcome, KpiSnapshot, KpiTotals,
    KpiTracker, NotificationSink, StatusReport,
};
use analyzer::{RollingAnalyzer, Summary, WindowEntry};
use futures::future::join_all;
use probe::{ProbeResult, ProbeSample, Source, SourceKind, SourceProbe, SourceRegistry};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{KvStore, KvStoreExt, Sample, SampleLog};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between poll cycles (default: 5 minutes)
    pub poll_interval: Duration,
    /// Probes running at once within a cycle
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            concurrency: 20,
        }
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub probed: usize,
    pub failed: usize,
    /// Transition and KPI alerts queued this cycle
    pub alerts: usize,
    /// Analyzer summaries queued this cycle
    pub analyses: usize,
    pub flush: Option<FlushOutcome>,
}

/// A source with its current alert status
#[derive(Debug, Clone, Serialize)]
pub struct SourceView {
    #[serde(flatten)]
    pub source: Source,
    #[serde(flatten)]
    pub status: StatusReport,
}

fn analysis_key(name: &str) -> String {
    format!("analysis:{name}")
}

/// Owns the poll cycle and everything it touches
pub struct PollScheduler {
    config: SchedulerConfig,
    registry: Arc<SourceRegistry>,
    probe: SourceProbe,
    state: AlertStateMachine,
    kpi: KpiTracker,
    analyzer: RwLock<RollingAnalyzer>,
    aggregator: Arc<AlertAggregator>,
    sink: Arc<dyn NotificationSink>,
    store: Arc<dyn KvStore>,
    samples: Arc<dyn SampleLog>,
    /// Held while a cycle probes and persists, and while a source is removed
    cycle: Mutex<()>,
}

impl PollScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<SourceRegistry>,
        probe: SourceProbe,
        state: AlertStateMachine,
        analyzer: RollingAnalyzer,
        aggregator: Arc<AlertAggregator>,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn KvStore>,
        samples: Arc<dyn SampleLog>,
    ) -> Self {
        Self {
            config,
            registry,
            probe,
            state,
            kpi: KpiTracker::new(store.clone()),
            analyzer: RwLock::new(analyzer),
            aggregator,
            sink,
            store,
            samples,
            cycle: Mutex::new(()),
        }
    }

    /// Reload persisted analysis windows for every known source
    pub async fn restore(&self) {
        let mut analyzer = self.analyzer.write().await;
        let mut restored = 0;
        for source in self.registry.all().await {
            match self
                .store
                .get_json::<Vec<WindowEntry>>(&analysis_key(&source.name))
                .await
            {
                Ok(Some(entries)) => {
                    analyzer.restore(&source.name, entries);
                    restored += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(source = %source.name, error = %e, "Failed to restore analysis window"),
            }
        }
        info!(restored, "Analysis windows restored");
    }

    /// Poll until cancelled. A cycle in progress always completes; ticks
    /// missed while it ran are delayed rather than bunched up.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.poll_interval, "Starting poll scheduler");
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        info!("Poll scheduler stopped");
    }

    /// Probe every active source once, queue the resulting alerts and try a
    /// flush
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let guard = self.cycle.lock().await;
        let sources = self.registry.active().await;
        let mut alerts = Vec::new();
        let mut failed = 0;
        let mut totals: BTreeMap<String, f64> = sources
            .iter()
            .filter_map(|s| s.total.clone())
            .map(|bucket| (bucket, 0.0))
            .collect();

        for batch in sources.chunks(self.config.concurrency.max(1)) {
            let results = join_all(batch.iter().map(|source| self.probe.probe(source))).await;

            for (source, result) in batch.iter().zip(&results) {
                metrics::record_probe(result);
                alerts.extend(self.state.evaluate(result).await);

                match result.sample() {
                    Some(sample) => {
                        if let Some(sum) = source.total.as_ref().and_then(|b| totals.get_mut(b)) {
                            *sum += sample.metric_value;
                        }
                        alerts.extend(self.record(source, result, sample).await);
                    }
                    None => failed += 1,
                }
            }
        }

        if !totals.is_empty() {
            debug!(?totals, "KPI totals");
            self.kpi
                .store_totals(&KpiTotals {
                    totals,
                    ts: Some(Utc::now()),
                })
                .await;
        }
        drop(guard);

        let alert_count = alerts.len();
        self.aggregator.enqueue(alerts).await;

        let summaries = self.analysis().await;
        let analyses = summaries.len();
        self.aggregator
            .enqueue(summaries.iter().map(Summary::render).collect())
            .await;

        let flush = match self.aggregator.flush(self.sink.as_ref(), false).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Flush failed");
                None
            }
        };

        metrics::record_cycle(sources.len(), started.elapsed());
        let pending = self.aggregator.pending().await.len();
        info!(
            probed = sources.len(),
            failed,
            alerts = alert_count,
            analyses,
            pending,
            "Poll cycle complete"
        );

        CycleReport {
            probed: sources.len(),
            failed,
            alerts: alert_count,
            analyses,
            flush,
        }
    }

    /// Persist a successful sample; returns KPI and counter change alerts
    async fn record(&self, source: &Source, result: &ProbeResult, sample: &ProbeSample) -> Vec<String> {
        let stored = to_sample(&result.source_name, sample);
        let alerts = match source.kind {
            SourceKind::Sync => Vec::new(),
            SourceKind::Kpi { .. } => {
                let snapshot = KpiSnapshot {
                    value: stored.metric_value,
                    identity: stored.identity_id.clone(),
                    ts: stored.timestamp,
                };
                self.kpi.observe(&source.name, snapshot).await
            }
            SourceKind::Counters { .. } => {
                let snapshot = CounterSnapshot {
                    counters: sample.counters.clone(),
                    identity: stored.identity_id.clone(),
                    ts: stored.timestamp,
                };
                self.kpi.observe_counters(&source.name, snapshot).await
            }
        };

        if source.kind != SourceKind::Sync {
            let window = {
                let mut analyzer = self.analyzer.write().await;
                analyzer.record(&source.name, &stored);
                analyzer.snapshot(&source.name)
            };
            if let Err(e) = self.store.set_json(&analysis_key(&source.name), &window).await {
                warn!(source = %source.name, error = %e, "Failed to persist analysis window");
            }
        }

        if let Err(e) = self.samples.append(&stored).await {
            warn!(source = %source.name, error = %e, "Failed to append sample");
        }
        debug!(source = %source.name, value = stored.metric_value, "Sample recorded");
        alerts
    }

    /// Current analyzer summaries
    pub async fn analysis(&self) -> Vec<Summary> {
        self.analyzer.read().await.summarize()
    }

    /// Analysis window of one source, oldest first
    pub async fn window(&self, name: &str) -> Vec<WindowEntry> {
        self.analyzer.read().await.snapshot(name)
    }

    /// Per-bucket KPI sums from the last cycle that produced any
    pub async fn totals(&self) -> KpiTotals {
        self.kpi.totals().await
    }

    /// Every configured source with its alert status
    pub async fn sources(&self) -> Vec<SourceView> {
        let mut views = Vec::new();
        for source in self.registry.all().await {
            let status = self.state.status(&source.name).await;
            views.push(SourceView { source, status });
        }
        views
    }

    /// Register a new source; it is probed from the next cycle on
    pub async fn add_source(&self, source: Source) -> Result<(), SchedulerError> {
        self.registry.add(source).await?;
        Ok(())
    }

    /// Remove a source and everything recorded about it. Waits for a
    /// running cycle so that cycle cannot write the state back.
    pub async fn remove_source(&self, name: &str) -> Result<Source, SchedulerError> {
        let _cycle = self.cycle.lock().await;
        let removed = self.registry.remove(name).await?;
        self.state.forget(name).await;
        self.kpi.forget(name).await;
        self.analyzer.write().await.forget(name);
        if let Err(e) = self.store.delete(&analysis_key(name)).await {
            warn!(source = name, error = %e, "Failed to delete analysis window");
        }
        Ok(removed)
    }

    pub fn aggregator(&self) -> &Arc<AlertAggregator> {
        &self.aggregator
    }

    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    pub fn samples(&self) -> &Arc<dyn SampleLog> {
        &self.samples
    }
}

fn to_sample(source_name: &str, sample: &ProbeSample) -> Sample {
    let identity = sample.identity.as_ref();
    Sample {
        timestamp: sample.observed_at,
        source_name: source_name.to_string(),
        metric_value: sample.metric_value,
        identity_id: identity.map(|i| i.key().to_string()),
        identity_name: identity.and_then(|i| i.identity_name.clone()),
        raw_payload: Some(sample.raw_payload.clone()),
    }
}
