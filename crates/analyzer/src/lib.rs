//! Rolling Inconsistency Analyzer
//!
//! Keeps a short window of samples per source and reports when redundant
//! indexers serving the same source disagree: values spread, identities
//! rotate, or the value goes backwards.

mod format;
mod rolling;

pub use format::{format_eth, format_int, format_pct};
pub use rolling::{RollingAnalyzer, Summary, WindowEntry, UNKNOWN_IDENTITY};
