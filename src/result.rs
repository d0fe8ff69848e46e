//! Result envelope handed back to the request-handling layer

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::TierLevel;
use crate::worker::WorkerStatus;

/// Terminal status of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every phase completed; confidence reflects any optional misses.
    Complete,
    /// The wall-clock budget elapsed mid-run; the payload is best-effort.
    DeadlineExceeded,
    /// A phase-level policy violation: the named workers in the named phase
    /// caused the request to fail.
    Failed { phase: u32, workers: Vec<String> },
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Complete)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }
}

/// Where the payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheProvenance {
    pub hit: bool,
    pub tier: Option<TierLevel>,
}

impl CacheProvenance {
    pub fn computed() -> Self {
        Self {
            hit: false,
            tier: None,
        }
    }

    pub fn hit(tier: TierLevel) -> Self {
        Self {
            hit: true,
            tier: Some(tier),
        }
    }
}

/// Wall-clock spent in one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTiming {
    pub name: String,
    pub status: WorkerStatus,
    pub elapsed: Duration,
}

/// The final envelope returned by [`Orchestrator::run`](crate::Orchestrator::run).
///
/// Created once per request and handed to the caller; the core retains
/// nothing. `request_id`, `elapsed`, `cache` and `completed_at` are fresh
/// per call — everything else is bit-identical when served from cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub request_id: Uuid,
    pub status: RunStatus,
    /// Successful worker payloads keyed by worker name, merged across phases
    pub payload: Value,
    /// 0.0–1.0 score reflecting how much expected data actually arrived
    pub confidence: f64,
    /// Workers that failed, timed out, or never ran
    pub degraded_workers: Vec<String>,
    /// Per-invocation timings; empty when the payload came from cache
    pub worker_timings: Vec<WorkerTiming>,
    pub elapsed: Duration,
    pub cache: CacheProvenance,
    pub completed_at: DateTime<Utc>,
}

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        !self.status.is_failed()
    }
}
