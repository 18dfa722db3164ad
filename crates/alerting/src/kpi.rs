//! KPI Change Alerts
//!
//! KPI sources are expected to grow monotonically and be served by a stable
//! indexer. Unlike the sync flags these alerts are not edge-triggered: every
//! drop and every identity change is reported.

use analyzer::{format_eth, format_int};
use chrono::{DateTime, Utc};
use probe::{CounterReading, CounterUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::{KvStore, KvStoreExt};
use tracing::warn;

/// Last observed KPI value of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub value: f64,
    pub identity: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Last observed counters of a counters source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub counters: Vec<CounterReading>,
    pub identity: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Per-bucket sums of the KPI values seen in one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiTotals {
    pub totals: BTreeMap<String, f64>,
    pub ts: Option<DateTime<Utc>>,
}

const TOTALS_KEY: &str = "kpi:totals";

fn snapshot_key(name: &str) -> String {
    format!("kpi:last:{name}")
}

fn counters_key(name: &str) -> String {
    format!("counters:last:{name}")
}

/// Compares each KPI sample with the previous one
#[derive(Clone)]
pub struct KpiTracker {
    store: Arc<dyn KvStore>,
}

impl KpiTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Record `current` and return the alerts it raises against the last value
    pub async fn observe(&self, name: &str, current: KpiSnapshot) -> Vec<String> {
        let key = snapshot_key(name);
        let previous = match self.store.get_json::<KpiSnapshot>(&key).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(source = name, error = %e, "Failed to read KPI snapshot");
                None
            }
        };

        let alerts = previous
            .as_ref()
            .map(|prev| changes(name, prev, &current))
            .unwrap_or_default();

        if let Err(e) = self.store.set_json(&key, &current).await {
            warn!(source = name, error = %e, "Failed to persist KPI snapshot");
        }
        alerts
    }

    /// Record a counters sample; every counter that went down raises an alert
    pub async fn observe_counters(&self, name: &str, current: CounterSnapshot) -> Vec<String> {
        let key = counters_key(name);
        let previous = match self.store.get_json::<CounterSnapshot>(&key).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(source = name, error = %e, "Failed to read counter snapshot");
                None
            }
        };

        let alerts = previous
            .as_ref()
            .map(|prev| counter_changes(name, prev, &current))
            .unwrap_or_default();

        if let Err(e) = self.store.set_json(&key, &current).await {
            warn!(source = name, error = %e, "Failed to persist counter snapshot");
        }
        alerts
    }

    /// Replace the stored cycle totals
    pub async fn store_totals(&self, totals: &KpiTotals) {
        if let Err(e) = self.store.set_json(TOTALS_KEY, totals).await {
            warn!(error = %e, "Failed to persist KPI totals");
        }
    }

    pub async fn totals(&self) -> KpiTotals {
        match self.store.get_json::<KpiTotals>(TOTALS_KEY).await {
            Ok(totals) => totals.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to read KPI totals");
                KpiTotals::default()
            }
        }
    }

    /// Drop the snapshots of a removed source
    pub async fn forget(&self, name: &str) {
        for key in [snapshot_key(name), counters_key(name)] {
            if let Err(e) = self.store.delete(&key).await {
                warn!(source = name, error = %e, "Failed to delete KPI snapshot");
            }
        }
    }
}

fn changes(name: &str, prev: &KpiSnapshot, current: &KpiSnapshot) -> Vec<String> {
    let mut alerts = Vec::new();
    if current.value < prev.value {
        alerts.push(format!(
            "{name}: value fell {} → {}",
            format_int(prev.value),
            format_int(current.value)
        ));
    }
    if let (Some(before), Some(after)) = (&prev.identity, &current.identity) {
        if before != after {
            alerts.push(format!("{name}: identity rotated {before} → {after}"));
        }
    }
    alerts
}

fn counter_changes(name: &str, prev: &CounterSnapshot, current: &CounterSnapshot) -> Vec<String> {
    let mut alerts: Vec<String> = current
        .counters
        .iter()
        .filter_map(|now| {
            let before = prev.counters.iter().find(|c| c.label == now.label)?;
            (now.value < before.value).then(|| {
                let show = |value: u128| match now.unit {
                    CounterUnit::Wei => format_eth(value),
                    CounterUnit::Count => format_int(value as f64),
                };
                format!("{name}: {}↓ {} → {}", now.label, show(before.value), show(now.value))
            })
        })
        .collect();

    if let (Some(before), Some(after)) = (&prev.identity, &current.identity) {
        if before != after {
            alerts.push(format!("{name}: identity rotated {before} → {after}"));
        }
    }
    alerts
}
