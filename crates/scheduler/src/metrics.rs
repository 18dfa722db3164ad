//! Prometheus metrics for the poll cycle.
//!
//! - `monitor_probes_total{outcome}`: probes by outcome (`ok`, `configuration`,
//!   `transport`, `data`)
//! - `monitor_cycle_duration_seconds`: wall-clock time of one poll cycle
//! - `monitor_sources_active`: sources probed in the last cycle
//!
//! Queue and flush metrics are recorded by the aggregator itself.

use metrics::{counter, gauge, histogram};
use probe::ProbeResult;
use std::time::Duration;

pub fn record_probe(result: &ProbeResult) {
    let outcome = result.error().map_or("ok", |e| e.kind());
    counter!("monitor_probes_total", "outcome" => outcome).increment(1);
}

pub fn record_cycle(sources: usize, elapsed: Duration) {
    gauge!("monitor_sources_active").set(sources as f64);
    histogram!("monitor_cycle_duration_seconds").record(elapsed.as_secs_f64());
}
