//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Per-IP rate limiting with tower_governor. Administrative routes get the
//! strict quota, read routes the lenient one.

use governor::middleware::StateInformationMiddleware;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Governor config that also emits X-RateLimit-* headers
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Seconds to replenish one request
    pub per_second: u64,
    /// Requests that can be made immediately
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 2,
            burst_size: 5,
        }
    }
}

impl RateLimitConfig {
    /// Source and subscriber changes, forced flushes
    pub fn strict() -> Self {
        Self {
            per_second: 4,
            burst_size: 2,
        }
    }

    /// Status and report reads
    pub fn lenient() -> Self {
        Self {
            per_second: 1,
            burst_size: 10,
        }
    }
}

/// Build a governor config, or `None` if the quota is zero.
///
/// Keys on the peer IP, so the service must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_governor_config(config: &RateLimitConfig) -> Option<Arc<DefaultGovernorConfig>> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
}
