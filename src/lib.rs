//! # Analysis Orchestration Core
//!
//! A Tower-friendly library for coordinating independent analysis workers
//! across ordered execution phases, with bounded concurrency, adaptive rate
//! limiting against a shared external dependency, graceful degradation on
//! partial failure, and a three-tier read-through cache in front of every
//! run.
//!
//! ## Core Concepts
//!
//! - **Worker**: a named Tower service `(Value) -> Value` with a declared
//!   timeout, registered at construction — a closed set, no runtime lookups
//! - **Phase**: an ordered stage whose workers run concurrently; later
//!   phases see the accumulated outputs of earlier ones
//! - **Degradation**: worker faults never escape the scheduler — they
//!   become results that discount the final confidence score
//! - **Tiered cache**: fast/medium/slow lookup with eager promotion and
//!   single-flight computation on miss
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use serde_json::{json, Value};
//! use tower_analysis::{worker_typed, AnalysisRequest, BoxError, Orchestrator, PhaseMode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! // Phase 1 gathers independently; phase 2 consumes what phase 1 produced.
//! let sentiment = worker_typed("sentiment", 1, |input: Value| async move {
//!     let subject = input["subject"].as_str().unwrap_or_default().to_string();
//!     Ok::<_, BoxError>(json!({ "subject": subject, "score": 0.72 }))
//! });
//! let summary = worker_typed("summary", 2, |input: Value| async move {
//!     let score = input["outputs"]["sentiment"]["score"].as_f64().unwrap_or(0.0);
//!     Ok::<_, BoxError>(json!({ "verdict": if score > 0.5 { "positive" } else { "negative" } }))
//! });
//!
//! let orchestrator = Orchestrator::builder()
//!     .phase(1, PhaseMode::BestEffort)
//!     .phase(2, PhaseMode::AllRequired)
//!     .worker(sentiment)
//!     .worker(summary.required(true))
//!     .build()?;
//!
//! let result = orchestrator.run(&AnalysisRequest::new("AAPL")).await;
//! println!(
//!     "status={:?} confidence={} cache_hit={}",
//!     result.status, result.confidence, result.cache.hit
//! );
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod policy;
pub mod rate_limit;
pub mod request;
pub mod result;
pub mod scheduler;
pub mod worker;

pub use cache::{
    CacheOutcome, CacheStatsSnapshot, CacheTier, Computed, MemoryTier, SqliteTier, TierLevel,
    TieredCache,
};
pub use config::{OrchestratorConfig, RateLimitConfig, TierTtls};
pub use error::{OrchestratorError, Result};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use policy::{DegradationPolicy, WeightedConfidence};
pub use rate_limit::AdaptiveRateLimiter;
pub use request::AnalysisRequest;
pub use result::{CacheProvenance, OrchestrationResult, RunStatus, WorkerTiming};
pub use scheduler::{PhaseFailure, PhaseMode, PhaseOutcome, PhasePlan, PhaseScheduler};
pub use worker::{worker_typed, RunContext, WorkerDef, WorkerResult, WorkerStatus, WorkerSvc};

// Re-export the Tower error type worker handlers return
pub use tower::BoxError;
