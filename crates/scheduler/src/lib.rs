//! Poll Scheduler
//!
//! Drives the monitor: a recurring poll cycle probes every active source,
//! evaluates alert transitions, feeds the rolling analyzer and flushes the
//! alert queue. A separate heartbeat task reports liveness. Both stop on a
//! shared cancellation token.

mod error;
mod heartbeat;
mod metrics;
mod poller;

pub use error::SchedulerError;
pub use heartbeat::Heartbeat;
pub use poller::{CycleReport, PollScheduler, SchedulerConfig, SourceView};
