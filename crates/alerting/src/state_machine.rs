//! Per-Source Alert State Machine
//!
//! Each source carries three independent flags. An alert is emitted only
//! when a flag changes value between consecutive evaluations, so repeating
//! the same probe outcome is silent.

use chrono::{DateTime, Utc};
use probe::ProbeResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use storage::{KvStore, KvStoreExt};
use tracing::{debug, info, warn};

/// Default lag (in blocks) above which a source counts as lagging
pub const DEFAULT_LAG_THRESHOLD: f64 = 100.0;

/// Persisted alert state of one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub lag_alert: bool,
    pub error_alert: bool,
    pub fetch_fail: bool,
    #[serde(default)]
    pub last_lag: Option<f64>,
    #[serde(default)]
    pub last_value: Option<f64>,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

/// Display status, highest priority flag first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceStatus {
    NeverChecked,
    FetchFailed,
    Lagging,
    IndexingError,
    Ok,
}

impl SourceStatus {
    fn from_state(state: Option<&AlertState>) -> Self {
        match state {
            None => SourceStatus::NeverChecked,
            Some(s) if s.fetch_fail => SourceStatus::FetchFailed,
            Some(s) if s.lag_alert => SourceStatus::Lagging,
            Some(s) if s.error_alert => SourceStatus::IndexingError,
            Some(_) => SourceStatus::Ok,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceStatus::NeverChecked => "never-checked",
            SourceStatus::FetchFailed => "fetch-failed",
            SourceStatus::Lagging => "lagging",
            SourceStatus::IndexingError => "indexing-error",
            SourceStatus::Ok => "ok",
        };
        f.write_str(label)
    }
}

/// Status of one source for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: SourceStatus,
    /// Last known lag; not shown while fetching fails
    pub lag: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
}

/// Compact lag: `950`, `12.3k`, `4.1M`; `n/a` when unknown
pub fn format_lag(lag: Option<f64>) -> String {
    match lag {
        None => "n/a".to_string(),
        Some(lag) if lag < 1_000.0 => format!("{lag}"),
        Some(lag) if lag < 1_000_000.0 => format!("{:.1}k", lag / 1_000.0),
        Some(lag) => format!("{:.1}M", lag / 1_000_000.0),
    }
}

fn state_key(name: &str) -> String {
    format!("sync:alert:{name}")
}

/// Evaluates probe results against the persisted per-source state
pub struct AlertStateMachine {
    store: Arc<dyn KvStore>,
    lag_threshold: f64,
}

impl AlertStateMachine {
    pub fn new(store: Arc<dyn KvStore>, lag_threshold: f64) -> Self {
        Self {
            store,
            lag_threshold,
        }
    }

    /// Evaluate one probe result and return the transition alerts.
    ///
    /// Storage failures are logged; an unreadable record is treated as absent.
    pub async fn evaluate(&self, result: &ProbeResult) -> Vec<String> {
        let name = &result.source_name;
        let key = state_key(name);

        let prev = match self.store.get_json::<AlertState>(&key).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(source = %name, error = %e, "Failed to read alert state");
                AlertState::default()
            }
        };

        let (alerts, next) = transition(name, &prev, result, self.lag_threshold);

        if let Err(e) = self.store.set_json(&key, &next).await {
            warn!(source = %name, error = %e, "Failed to persist alert state");
        }
        if !alerts.is_empty() {
            info!(source = %name, count = alerts.len(), "State transitions");
        } else {
            debug!(source = %name, "No state change");
        }
        alerts
    }

    /// Display status of a source
    pub async fn status(&self, name: &str) -> StatusReport {
        let state = match self.store.get_json::<AlertState>(&state_key(name)).await {
            Ok(state) => state,
            Err(e) => {
                warn!(source = %name, error = %e, "Failed to read alert state");
                None
            }
        };

        let status = SourceStatus::from_state(state.as_ref());
        StatusReport {
            status,
            lag: match status {
                SourceStatus::NeverChecked | SourceStatus::FetchFailed => None,
                _ => state.as_ref().and_then(|s| s.last_lag),
            },
            last_check: state.and_then(|s| s.last_check),
        }
    }

    /// Drop a removed source's state
    pub async fn forget(&self, name: &str) {
        if let Err(e) = self.store.delete(&state_key(name)).await {
            warn!(source = %name, error = %e, "Failed to delete alert state");
        }
    }
}

/// Pure transition: alerts to emit and the state to persist
fn transition(
    name: &str,
    prev: &AlertState,
    result: &ProbeResult,
    lag_threshold: f64,
) -> (Vec<String>, AlertState) {
    let mut alerts = Vec::new();

    let sample = match &result.outcome {
        Err(e) => {
            if !prev.fetch_fail {
                alerts.push(format!("❌ {name}: fetch failed ({e})"));
            }
            let next = AlertState {
                fetch_fail: true,
                ..prev.clone()
            };
            return (alerts, next);
        }
        Ok(sample) => sample,
    };

    let lag = sample.lag();
    // Unknown lag keeps the previous flag
    let lagging = match lag {
        Some(lag) => lag > lag_threshold,
        None => prev.lag_alert,
    };

    if lagging && !prev.lag_alert {
        alerts.push(format!(
            "🔴 {name}: lagging {} blocks (chain: {}, subgraph: {})",
            format_lag(lag),
            sample.reference_value.map_or_else(|| "n/a".to_string(), |r| r.to_string()),
            sample
                .indexed_block
                .map_or_else(|| "n/a".to_string(), |b| b.to_string()),
        ));
    } else if !lagging && prev.lag_alert {
        alerts.push(format!("🟢 {name}: sync recovered (lag: {})", format_lag(lag)));
    }

    if sample.flagged && !prev.error_alert {
        alerts.push(format!("⚠️ {name}: indexing errors detected"));
    } else if !sample.flagged && prev.error_alert {
        alerts.push(format!("🟢 {name}: indexing errors cleared"));
    }

    if prev.fetch_fail {
        alerts.push(format!("🟢 {name}: fetch recovered"));
    }

    let next = AlertState {
        lag_alert: lagging,
        error_alert: sample.flagged,
        fetch_fail: false,
        last_lag: lag,
        last_value: Some(sample.metric_value),
        last_check: Some(sample.observed_at),
    };
    (alerts, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe::{ProbeError, ProbeSample, TransportError};
    use serde_json::json;
    use storage::MemoryStore;

    const NAME: &str = "Gnosis Registry";

    fn ok(metric: f64, reference: Option<f64>, flagged: bool) -> ProbeResult {
        ProbeResult {
            source_name: NAME.to_string(),
            chain: "gnosis".to_string(),
            outcome: Ok(ProbeSample {
                observed_at: Utc::now(),
                metric_value: metric,
                indexed_block: Some(metric),
                reference_value: reference,
                flagged,
                identity: None,
                counters: Vec::new(),
                raw_payload: json!({}),
            }),
        }
    }

    fn lagging_by(lag: f64) -> ProbeResult {
        ok(1_000.0, Some(1_000.0 + lag), false)
    }

    fn failed() -> ProbeResult {
        ProbeResult {
            source_name: NAME.to_string(),
            chain: "gnosis".to_string(),
            outcome: Err(ProbeError::Transport(TransportError::Http { status: 502 })),
        }
    }

    fn machine() -> (AlertStateMachine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AlertStateMachine::new(store.clone(), DEFAULT_LAG_THRESHOLD), store)
    }

    async fn stored(store: &MemoryStore) -> AlertState {
        store.get_json(&state_key(NAME)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_lag_crossing_threshold_alerts_once() {
        let (machine, store) = machine();

        assert!(machine.evaluate(&lagging_by(50.0)).await.is_empty());

        let alerts = machine.evaluate(&lagging_by(150.0)).await;
        assert_eq!(
            alerts,
            vec!["🔴 Gnosis Registry: lagging 150 blocks (chain: 1150, subgraph: 1000)".to_string()]
        );
        assert!(stored(&store).await.lag_alert);
    }

    #[tokio::test]
    async fn test_repeat_result_is_silent() {
        let (machine, store) = machine();
        let flags = |s: &AlertState| (s.lag_alert, s.error_alert, s.fetch_fail);

        assert_eq!(machine.evaluate(&lagging_by(500.0)).await.len(), 1);
        let raised = stored(&store).await;

        let result = lagging_by(500.0);
        assert!(machine.evaluate(&result).await.is_empty());
        let repeated = stored(&store).await;
        assert_eq!(flags(&repeated), flags(&raised));
        assert_eq!(repeated.last_lag, raised.last_lag);
        assert_eq!(repeated.last_value, raised.last_value);

        assert!(machine.evaluate(&lagging_by(800.0)).await.is_empty());
        let deeper = stored(&store).await;
        assert_eq!(flags(&deeper), (true, false, false));
        assert_eq!(deeper.last_lag, Some(800.0));

        let recovered = machine.evaluate(&lagging_by(3.0)).await;
        assert_eq!(recovered, vec!["🟢 Gnosis Registry: sync recovered (lag: 3)".to_string()]);
        let cleared = stored(&store).await;
        assert!(machine.evaluate(&lagging_by(3.0)).await.is_empty());
        assert_eq!(flags(&stored(&store).await), flags(&cleared));
        assert_eq!(flags(&cleared), (false, false, false));
    }

    #[tokio::test]
    async fn test_lag_alert_without_meta_block() {
        let (machine, _) = machine();
        let mut result = lagging_by(500.0);
        if let Ok(sample) = &mut result.outcome {
            sample.indexed_block = None;
        }
        // A KPI value is not a block height, so without `_meta` the lag is unknown
        assert!(machine.evaluate(&result).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_lag_keeps_previous_flag() {
        let (machine, store) = machine();

        machine.evaluate(&lagging_by(200.0)).await;
        assert!(machine.evaluate(&ok(1_000.0, None, false)).await.is_empty());
        assert!(stored(&store).await.lag_alert);

        let (fresh, _) = self::machine();
        assert!(fresh.evaluate(&ok(1_000.0, None, false)).await.is_empty());
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let (machine, store) = machine();
        machine.evaluate(&lagging_by(10.0)).await;

        let first = machine.evaluate(&failed()).await;
        assert_eq!(first, vec!["❌ Gnosis Registry: fetch failed (HTTP 502)".to_string()]);
        assert!(machine.evaluate(&failed()).await.is_empty());

        let state = stored(&store).await;
        assert!(state.fetch_fail);
        assert_eq!(state.last_lag, Some(10.0));

        let recovered = machine.evaluate(&lagging_by(10.0)).await;
        assert_eq!(recovered, vec!["🟢 Gnosis Registry: fetch recovered".to_string()]);
    }

    #[tokio::test]
    async fn test_indexing_error_edges() {
        let (machine, _) = machine();

        let detected = machine.evaluate(&ok(10.0, Some(10.0), true)).await;
        assert_eq!(detected, vec!["⚠️ Gnosis Registry: indexing errors detected".to_string()]);
        assert!(machine.evaluate(&ok(11.0, Some(11.0), true)).await.is_empty());

        let cleared = machine.evaluate(&ok(12.0, Some(12.0), false)).await;
        assert_eq!(cleared, vec!["🟢 Gnosis Registry: indexing errors cleared".to_string()]);
    }

    #[tokio::test]
    async fn test_alert_iff_flag_changes() {
        let (machine, store) = machine();
        let sequence = [
            lagging_by(0.0),
            lagging_by(150.0),
            failed(),
            ok(10.0, Some(10.0), true),
            ok(10.0, Some(10.0), true),
            failed(),
            lagging_by(2_000_000.0),
        ];

        let mut prev = AlertState::default();
        for result in &sequence {
            let alerts = machine.evaluate(result).await;
            let next = stored(&store).await;
            let changes = [
                prev.lag_alert != next.lag_alert,
                prev.error_alert != next.error_alert,
                prev.fetch_fail != next.fetch_fail,
            ]
            .iter()
            .filter(|changed| **changed)
            .count();
            assert_eq!(alerts.len(), changes, "result {result:?}");
            prev = next;
        }
    }

    #[tokio::test]
    async fn test_status_priority() {
        let (machine, _) = machine();
        assert_eq!(machine.status(NAME).await.status, SourceStatus::NeverChecked);

        machine.evaluate(&ok(10.0, Some(500.0), true)).await;
        let status = machine.status(NAME).await;
        assert_eq!(status.status, SourceStatus::Lagging);
        assert_eq!(status.lag, Some(490.0));

        machine.evaluate(&failed()).await;
        let status = machine.status(NAME).await;
        assert_eq!(status.status, SourceStatus::FetchFailed);
        assert_eq!(status.lag, None);
        assert_eq!(status.status.to_string(), "fetch-failed");

        machine.evaluate(&ok(10.0, Some(10.0), true)).await;
        assert_eq!(machine.status(NAME).await.status, SourceStatus::IndexingError);

        machine.forget(NAME).await;
        assert_eq!(machine.status(NAME).await.status, SourceStatus::NeverChecked);
    }

    #[test]
    fn test_format_lag() {
        assert_eq!(format_lag(None), "n/a");
        assert_eq!(format_lag(Some(999.0)), "999");
        assert_eq!(format_lag(Some(12_345.0)), "12.3k");
        assert_eq!(format_lag(Some(4_100_000.0)), "4.1M");
        assert_eq!(format_lag(Some(-3.0)), "-3");
    }
}
