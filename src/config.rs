//! Configuration for the orchestrator and its collaborators
//!
//! All knobs the request-handling layer can turn live here: worker
//! concurrency, the request deadline, cache TTLs per tier, and the adaptive
//! rate limiter's shape.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of worker invocations in flight at once,
    /// shared across all concurrent requests
    pub concurrency_limit: usize,

    /// Wall-clock budget for a whole `run()` call
    pub request_deadline: Duration,

    /// Entry bound for the fast (in-process LRU) cache tier
    pub fast_capacity: usize,

    /// TTL applied per cache tier when storing results
    pub cache_ttls: TierTtls,

    /// Adaptive rate limiter configuration
    pub rate_limit: RateLimitConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            request_deadline: Duration::from_secs(30),
            fast_capacity: 512,
            cache_ttls: TierTtls::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Per-tier time-to-live values, fastest tier first.
///
/// Faster tiers carry shorter TTLs: a value promoted out of a slower tier is
/// re-stamped with the faster tier's own (shorter) TTL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierTtls {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl Default for TierTtls {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(300),
            medium: Duration::from_secs(3600),
            slow: Duration::from_secs(86_400),
        }
    }
}

/// Adaptive rate limiter configuration.
///
/// The limiter is a token bucket whose refill rate moves between `min_rate`
/// and `max_rate` based on the error rate observed over the last `window`
/// recorded call outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Initial refill rate in tokens per second
    pub rate: f64,

    /// Bucket capacity in tokens
    pub burst: f64,

    /// Refill rate never drops below this, so the system keeps
    /// probing for recovery after a failure burst
    pub min_rate: f64,

    /// Refill rate never grows above this
    pub max_rate: f64,

    /// Number of recorded outcomes the rolling error rate is computed over
    pub window: usize,

    /// Multiplier applied to the rate when the error rate is high
    pub shrink_factor: f64,

    /// Multiplier applied to the rate after a clean full window
    pub grow_factor: f64,

    /// Error rate above which the rate shrinks
    pub high_error_threshold: f64,

    /// Error rate below which (over a full window) the rate grows
    pub low_error_threshold: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            burst: 20.0,
            min_rate: 0.1,
            max_rate: 50.0,
            window: 50,
            shrink_factor: 0.8,
            grow_factor: 1.1,
            high_error_threshold: 0.10,
            low_error_threshold: 0.01,
        }
    }
}
