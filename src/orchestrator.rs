//! Orchestrator facade: cache-fronted phase execution
//!
//! `run()` computes the request fingerprint, consults the tiered cache, and
//! only on a miss drives the phase scheduler. The facade holds no mutable
//! state of its own — collaborators sit behind `Arc`s, so one orchestrator
//! serves any number of concurrent requests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{CacheOutcome, CacheStatsSnapshot, Computed, MemoryTier, TieredCache};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::limiter::ConcurrencyLimiter;
use crate::policy::{DegradationPolicy, WeightedConfidence};
use crate::rate_limit::AdaptiveRateLimiter;
use crate::request::AnalysisRequest;
use crate::result::{CacheProvenance, OrchestrationResult, RunStatus, WorkerTiming};
use crate::scheduler::{PhaseMode, PhasePlan, PhaseScheduler};
use crate::worker::{RunContext, WorkerDef};

/// What gets written through the cache tiers: the part of a completed run
/// that must replay bit-identically. Timing and provenance stay outside.
#[derive(Debug, Serialize, Deserialize)]
struct CachedAnalysis {
    payload: Value,
    confidence: f64,
    degraded_workers: Vec<String>,
}

/// Everything a fresh scheduling pass produced, pre-envelope.
#[derive(Debug)]
struct RunDetails {
    status: RunStatus,
    payload: Value,
    confidence: f64,
    degraded_workers: Vec<String>,
    timings: Vec<WorkerTiming>,
}

/// Top-level facade over the scheduler, cache, limiters and policy.
pub struct Orchestrator {
    phases: Vec<PhasePlan>,
    scheduler: PhaseScheduler,
    cache: Arc<TieredCache>,
    policy: Arc<dyn DegradationPolicy>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run one analysis request.
    ///
    /// Never returns an error: worker faults are folded into the result's
    /// confidence accounting, phase-policy violations and deadline
    /// exhaustion come back as [`RunStatus`] values.
    pub async fn run(&self, request: &AnalysisRequest) -> OrchestrationResult {
        let span = info_span!("analysis_run", subject = %request.subject);
        self.run_inner(request).instrument(span).await
    }

    /// Per-tier hit counts and aggregate rate, for observability.
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    async fn run_inner(&self, request: &AnalysisRequest) -> OrchestrationResult {
        let started = std::time::Instant::now();
        let key = request.fingerprint();
        let ttls = self.config.cache_ttls;

        // Side channel: populated only when the compute branch actually ran,
        // so the envelope below can tell a fresh run from a cache hit.
        let details: Arc<Mutex<Option<RunDetails>>> = Arc::new(Mutex::new(None));
        let details_sink = details.clone();
        let (value, outcome) = self
            .cache
            .get_or_compute(&key, &ttls, move || async move {
                let run = self.run_phases(request).await;
                let value = json!({
                    "payload": run.payload.clone(),
                    "confidence": run.confidence,
                    "degraded_workers": run.degraded_workers.clone(),
                });
                let store = run.status.is_complete();
                *details_sink.lock().unwrap() = Some(run);
                if store {
                    Computed::cached(value)
                } else {
                    Computed::transient(value)
                }
            })
            .await;

        let fresh = details.lock().unwrap().take();
        let result = match fresh {
            Some(run) => self.envelope(run, started, CacheProvenance::computed()),
            None => {
                let tier = match outcome {
                    CacheOutcome::Hit(level) => level,
                    // Unreachable in practice: no details means no compute ran
                    CacheOutcome::Computed => {
                        return self.recompute_uncached(request, &key, started).await
                    }
                };
                match serde_json::from_value::<CachedAnalysis>(value) {
                    Ok(cached) => self.envelope(
                        RunDetails {
                            status: RunStatus::Complete,
                            payload: cached.payload,
                            confidence: cached.confidence,
                            degraded_workers: cached.degraded_workers,
                            timings: Vec::new(),
                        },
                        started,
                        CacheProvenance::hit(tier),
                    ),
                    Err(e) => {
                        warn!(error = %e, "cached analysis entry unreadable, recomputing");
                        self.recompute_uncached(request, &key, started).await
                    }
                }
            }
        };
        info!(
            status = ?result.status,
            confidence = result.confidence,
            cache_hit = result.cache.hit,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "analysis run finished"
        );
        result
    }

    /// Fallback for a corrupted cache entry: drop it and run the phases
    /// directly, bypassing the cache for this request.
    async fn recompute_uncached(
        &self,
        request: &AnalysisRequest,
        key: &str,
        started: std::time::Instant,
    ) -> OrchestrationResult {
        self.cache.invalidate(key).await;
        let run = self.run_phases(request).await;
        self.envelope(run, started, CacheProvenance::computed())
    }

    async fn run_phases(&self, request: &AnalysisRequest) -> RunDetails {
        let deadline = Instant::now() + self.config.request_deadline;
        let context = RunContext::new(request.clone());
        let run = self.scheduler.run(&self.phases, context, deadline).await;

        let status = if let Some(failure) = run.failure {
            RunStatus::Failed {
                phase: failure.phase,
                workers: failure.workers,
            }
        } else if run.deadline_hit {
            RunStatus::DeadlineExceeded
        } else {
            RunStatus::Complete
        };

        // A failed request carries no confidence; everything else is scored
        // on whatever outcomes exist, truncated runs included.
        let confidence = match &status {
            RunStatus::Failed { .. } => 0.0,
            _ => self.policy.confidence(&run.outcomes),
        };

        let mut degraded_workers: Vec<String> = run
            .outcomes
            .iter()
            .flat_map(|o| o.results.values())
            .filter(|r| !r.is_success())
            .map(|r| r.name.clone())
            .collect();
        // Workers in phases that never started were skipped
        let executed: HashSet<u32> = run.outcomes.iter().map(|o| o.phase).collect();
        for plan in &self.phases {
            if !executed.contains(&plan.number) {
                degraded_workers.extend(plan.workers.iter().map(|d| d.name.to_string()));
            }
        }

        let timings = run
            .outcomes
            .iter()
            .flat_map(|o| o.results.values())
            .map(|r| WorkerTiming {
                name: r.name.clone(),
                status: r.status,
                elapsed: r.elapsed,
            })
            .collect();

        RunDetails {
            status,
            payload: Value::Object(run.context.outputs.into_iter().collect()),
            confidence,
            degraded_workers,
            timings,
        }
    }

    fn envelope(
        &self,
        run: RunDetails,
        started: std::time::Instant,
        cache: CacheProvenance,
    ) -> OrchestrationResult {
        OrchestrationResult {
            request_id: Uuid::new_v4(),
            status: run.status,
            payload: run.payload,
            confidence: run.confidence,
            degraded_workers: run.degraded_workers,
            worker_timings: run.timings,
            elapsed: started.elapsed(),
            cache,
            completed_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phases", &self.phases.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Accumulates workers, phases, policy and collaborators, then validates the
/// registration and wires the stack. Validation errors here are the only
/// place the public API returns `Err`.
pub struct OrchestratorBuilder {
    workers: Vec<WorkerDef>,
    phase_modes: BTreeMap<u32, PhaseMode>,
    policy: Arc<dyn DegradationPolicy>,
    config: OrchestratorConfig,
    limiter: Option<Arc<ConcurrencyLimiter>>,
    rate: Option<Arc<AdaptiveRateLimiter>>,
    cache: Option<Arc<TieredCache>>,
}

impl OrchestratorBuilder {
    fn new() -> Self {
        Self {
            workers: Vec::new(),
            phase_modes: BTreeMap::new(),
            policy: Arc::new(WeightedConfidence::default()),
            config: OrchestratorConfig::default(),
            limiter: None,
            rate: None,
            cache: None,
        }
    }

    /// Declare a phase and how it treats partial failure. Phases execute in
    /// ascending number order.
    pub fn phase(mut self, number: u32, mode: PhaseMode) -> Self {
        self.phase_modes.insert(number, mode);
        self
    }

    pub fn worker(mut self, worker: WorkerDef) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn workers(mut self, workers: Vec<WorkerDef>) -> Self {
        self.workers.extend(workers);
        self
    }

    pub fn policy(mut self, policy: impl DegradationPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a concurrency limiter across orchestrators. Defaults to a new
    /// limiter sized from the config.
    pub fn limiter(mut self, limiter: Arc<ConcurrencyLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Share an adaptive rate limiter across orchestrators. Defaults to a
    /// new limiter shaped by the config.
    pub fn rate_limiter(mut self, rate: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Provide the cache stack. Defaults to three in-process memory tiers,
    /// which suits tests and single-process deployments.
    pub fn cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let mut seen = HashSet::new();
        for def in &self.workers {
            if !seen.insert(def.name) {
                return Err(OrchestratorError::DuplicateWorker {
                    name: def.name.to_string(),
                });
            }
            if !self.phase_modes.contains_key(&def.phase) {
                return Err(OrchestratorError::UndeclaredPhase {
                    name: def.name.to_string(),
                    phase: def.phase,
                });
            }
        }

        let mut phases = Vec::with_capacity(self.phase_modes.len());
        for (&number, &mode) in &self.phase_modes {
            let workers: Vec<WorkerDef> = self
                .workers
                .iter()
                .filter(|def| def.phase == number)
                .cloned()
                .collect();
            if workers.is_empty() {
                return Err(OrchestratorError::EmptyPhase { phase: number });
            }
            phases.push(PhasePlan {
                number,
                mode,
                workers,
            });
        }

        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(ConcurrencyLimiter::new(self.config.concurrency_limit)));
        let rate = self
            .rate
            .unwrap_or_else(|| Arc::new(AdaptiveRateLimiter::new(self.config.rate_limit.clone())));
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(TieredCache::new(
                Arc::new(MemoryTier::new("memory-fast", self.config.fast_capacity)),
                Arc::new(MemoryTier::unbounded("memory-medium")),
                Arc::new(MemoryTier::unbounded("memory-slow")),
            ))
        });

        Ok(Orchestrator {
            phases,
            scheduler: PhaseScheduler::new(limiter, rate),
            cache,
            policy: self.policy,
            config: self.config,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
