//! Alerting System
//!
//! Turns probe results into edge-triggered alert messages, batches them
//! behind a rate-limited flush, and fans the batch out to subscribers.

mod aggregator;
mod error;
mod kpi;
mod sink;
mod state_machine;
mod subscribers;

pub use aggregator::{
    AggregatorConfig, AlertAggregator, CategoryCounts, FlushOutcome, HistoryEntry, Report,
    SkipReason,
};
pub use error::AlertError;
pub use kpi::{CounterSnapshot, KpiSnapshot, KpiTotals, KpiTracker};
pub use sink::{Attachment, LogSink, NotificationSink, WebhookSink};
pub use state_machine::{format_lag, AlertState, AlertStateMachine, SourceStatus, StatusReport};
pub use subscribers::Subscribers;
