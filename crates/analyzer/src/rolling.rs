//! Per-source rolling windows and their summaries

use crate::format::{format_int, format_pct};
use chrono::{DateTime, Utc};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use storage::Sample;
use tracing::debug;

/// Identity recorded for samples that carried no attestation
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// What the analyzer keeps of each sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub identity: Option<String>,
}

impl WindowEntry {
    fn identity_key(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN_IDENTITY)
    }
}

impl From<&Sample> for WindowEntry {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            value: sample.metric_value,
            identity: sample.identity_id.clone(),
        }
    }
}

/// Inconsistency signal for one source over its current window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub source_name: String,
    pub samples: usize,
    pub distinct_identities: usize,
    /// Up to three of the identities seen
    pub identities: Vec<String>,
    pub min: f64,
    pub max: f64,
    pub spread: f64,
    /// Spread as a fraction of max (0 when max is 0)
    pub spread_pct: f64,
    /// Adjacent samples served by different identities
    pub rotations: usize,
    /// Adjacent samples where the value went down
    pub regressions: usize,
    pub latest_identity: Option<String>,
    pub latest_value: f64,
}

impl Summary {
    /// One-line alert text
    pub fn render(&self) -> String {
        format!(
            "Analysis {}: {} identity changes over {} samples; {} identities; range {} → {} (Δ {}, {}); latest {}",
            self.source_name,
            self.rotations,
            self.samples,
            self.distinct_identities,
            format_int(self.min),
            format_int(self.max),
            format_int(self.spread),
            format_pct(self.spread_pct),
            self.latest_identity.as_deref().unwrap_or("n/a"),
        )
    }
}

/// Bounded per-source history used only for spread detection
#[derive(Debug, Clone)]
pub struct RollingAnalyzer {
    capacity: usize,
    windows: BTreeMap<String, RingBuffer<WindowEntry>>,
}

impl RollingAnalyzer {
    /// Create an analyzer keeping `capacity` samples per source
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: BTreeMap::new(),
        }
    }

    /// Append a sample to its source's window, evicting the oldest on overflow
    pub fn record(&mut self, source_name: &str, sample: &Sample) {
        let capacity = self.capacity;
        let window = self
            .windows
            .entry(source_name.to_string())
            .or_insert_with(|| RingBuffer::new(capacity));
        window.push(WindowEntry::from(sample));
        debug!(source = source_name, len = window.len(), "Analysis sample recorded");
    }

    /// Replace a source's window with previously persisted entries
    pub fn restore(&mut self, source_name: &str, entries: Vec<WindowEntry>) {
        self.windows.insert(
            source_name.to_string(),
            RingBuffer::from_items(self.capacity, entries),
        );
    }

    /// Entries of a source's window, oldest first
    pub fn snapshot(&self, source_name: &str) -> Vec<WindowEntry> {
        self.windows
            .get(source_name)
            .map(|w| w.to_vec())
            .unwrap_or_default()
    }

    /// Drop a source's window (source removed)
    pub fn forget(&mut self, source_name: &str) {
        self.windows.remove(source_name);
    }

    /// Summaries for every source currently showing inconsistency
    pub fn summarize(&self) -> Vec<Summary> {
        self.windows
            .iter()
            .filter_map(|(name, window)| summarize_window(name, window))
            .collect()
    }

    /// Summary for one source, if it shows inconsistency
    pub fn summarize_source(&self, source_name: &str) -> Option<Summary> {
        self.windows
            .get(source_name)
            .and_then(|window| summarize_window(source_name, window))
    }
}

fn summarize_window(name: &str, window: &RingBuffer<WindowEntry>) -> Option<Summary> {
    if window.len() < 2 {
        return None;
    }

    // First-seen order, so the listed identities are stable
    let mut seen = BTreeSet::new();
    let mut identities = Vec::new();
    for entry in window.iter() {
        if seen.insert(entry.identity_key()) {
            identities.push(entry.identity_key().to_string());
        }
    }
    if identities.len() < 2 {
        return None;
    }

    let min = window.iter().map(|e| e.value).fold(f64::INFINITY, f64::min);
    let max = window.iter().map(|e| e.value).fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;

    let rotations = window
        .pairs()
        .filter(|(prev, curr)| prev.identity_key() != curr.identity_key())
        .count();
    let regressions = window.pairs().filter(|(prev, curr)| curr.value < prev.value).count();

    if rotations == 0 && regressions == 0 && spread == 0.0 {
        return None;
    }

    let latest = window.latest()?;
    let distinct_identities = identities.len();
    identities.truncate(3);

    Some(Summary {
        source_name: name.to_string(),
        samples: window.len(),
        distinct_identities,
        identities,
        min,
        max,
        spread,
        spread_pct: if max != 0.0 { spread / max } else { 0.0 },
        rotations,
        regressions,
        latest_identity: latest.identity.clone(),
        latest_value: latest.value,
    })
}
