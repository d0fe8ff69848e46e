//! Phase scheduling: bounded parallel worker execution with degradation
//!
//! Phases run strictly in declared order; all workers inside a phase run
//! concurrently, each gated by the shared concurrency limiter, its own
//! timeout, and (for workers touching the shared external dependency) the
//! adaptive rate limiter. Every invocation resolves to a [`WorkerResult`] —
//! success, failure, timeout and even a panicking worker all return normally
//! to aggregation; no fault escapes the scheduler boundary.
//!
//! The whole run is raced against a wall-clock deadline. When it expires
//! mid-phase the scheduler stops waiting, synthesizes timed-out results for
//! workers still in flight (the tasks themselves are left to finish in the
//! background up to their own timeouts), aggregates the truncated phase, and
//! does not advance further.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::time::{sleep_until, timeout, Instant};
use tower::{Service, ServiceExt};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::limiter::ConcurrencyLimiter;
use crate::rate_limit::AdaptiveRateLimiter;
use crate::worker::{RunContext, WorkerDef, WorkerResult, WorkerSvc};

/// How a phase treats partial worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMode {
    /// Every worker marked `required` must succeed or the request fails.
    AllRequired,
    /// The phase is usable as long as at least one worker succeeds.
    BestEffort,
}

/// A declared phase with the workers registered to it, in declaration order.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub number: u32,
    pub mode: PhaseMode,
    pub workers: Vec<WorkerDef>,
}

/// Aggregated view of one phase. `results` is keyed by worker name in
/// declaration order; within the phase, completion order carries no meaning.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: u32,
    pub mode: PhaseMode,
    pub results: IndexMap<String, WorkerResult>,
    pub successes: usize,
    pub failures: usize,
    pub usable: bool,
}

impl PhaseOutcome {
    pub fn new(phase: u32, mode: PhaseMode) -> Self {
        Self {
            phase,
            mode,
            results: IndexMap::new(),
            successes: 0,
            failures: 0,
            usable: true,
        }
    }

    pub fn push(&mut self, result: WorkerResult) {
        if result.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.results.insert(result.name.clone(), result);
    }
}

/// A phase-level policy violation: the request fails, carrying the phase and
/// the workers that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: u32,
    pub workers: Vec<String>,
}

/// Everything a finished (or truncated) scheduling pass produced.
#[derive(Debug)]
pub struct SchedulerRun {
    pub outcomes: Vec<PhaseOutcome>,
    pub context: RunContext,
    pub failure: Option<PhaseFailure>,
    pub deadline_hit: bool,
}

/// Drives phases for one request at a time; the limiter and rate limiter it
/// holds are process-wide and shared across all concurrent requests.
#[derive(Debug, Clone)]
pub struct PhaseScheduler {
    limiter: Arc<ConcurrencyLimiter>,
    rate: Arc<AdaptiveRateLimiter>,
}

impl PhaseScheduler {
    pub fn new(limiter: Arc<ConcurrencyLimiter>, rate: Arc<AdaptiveRateLimiter>) -> Self {
        Self { limiter, rate }
    }

    pub async fn run(
        &self,
        phases: &[PhasePlan],
        context: RunContext,
        deadline: Instant,
    ) -> SchedulerRun {
        let mut run = SchedulerRun {
            outcomes: Vec::with_capacity(phases.len()),
            context,
            failure: None,
            deadline_hit: false,
        };

        for plan in phases {
            let span = info_span!("phase", number = plan.number);
            let (collected, hit) = self
                .run_phase(plan, &run.context, deadline)
                .instrument(span)
                .await;
            run.deadline_hit |= hit;

            let mut outcome = PhaseOutcome::new(plan.number, plan.mode);
            let mut by_name = collected;
            for def in &plan.workers {
                if let Some(result) = by_name.remove(def.name) {
                    outcome.push(result);
                }
            }

            // Successful payloads become visible to later projections even
            // when this phase ends up unusable.
            for result in outcome.results.values() {
                if let Some(payload) = &result.payload {
                    run.context
                        .outputs
                        .insert(result.name.clone(), payload.clone());
                }
            }

            let violators: Vec<String> = match plan.mode {
                PhaseMode::AllRequired => plan
                    .workers
                    .iter()
                    .filter(|def| def.required)
                    .filter(|def| {
                        outcome
                            .results
                            .get(def.name)
                            .map_or(true, |r| !r.is_success())
                    })
                    .map(|def| def.name.to_string())
                    .collect(),
                PhaseMode::BestEffort => {
                    if outcome.successes == 0 {
                        plan.workers.iter().map(|d| d.name.to_string()).collect()
                    } else {
                        Vec::new()
                    }
                }
            };
            outcome.usable = violators.is_empty();
            info!(
                phase = plan.number,
                successes = outcome.successes,
                failures = outcome.failures,
                usable = outcome.usable,
                "phase complete"
            );
            run.outcomes.push(outcome);

            if run.deadline_hit {
                warn!(phase = plan.number, "request deadline hit, not advancing");
                break;
            }
            if !violators.is_empty() {
                run.failure = Some(PhaseFailure {
                    phase: plan.number,
                    workers: violators,
                });
                break;
            }
        }
        run
    }

    /// Fan a phase's workers out and collect until done or the deadline
    /// fires. Returns results keyed by name plus whether the deadline hit.
    async fn run_phase(
        &self,
        plan: &PhasePlan,
        context: &RunContext,
        deadline: Instant,
    ) -> (HashMap<&'static str, WorkerResult>, bool) {
        let phase_start = std::time::Instant::now();
        let mut tasks = FuturesUnordered::new();
        for def in &plan.workers {
            let input = (def.project)(context);
            let name = def.name;
            let handle = tokio::spawn(invoke_worker(
                name,
                def.service.clone(),
                input,
                def.timeout,
                def.rate_limited,
                self.limiter.clone(),
                self.rate.clone(),
            ));
            tasks.push(async move { (name, handle.await) });
        }

        let mut collected: HashMap<&'static str, WorkerResult> = HashMap::new();
        let expiry = sleep_until(deadline);
        tokio::pin!(expiry);
        let mut hit = false;

        while !tasks.is_empty() {
            tokio::select! {
                Some((name, joined)) = tasks.next() => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(worker = name, error = %e, "worker task aborted");
                            WorkerResult::failed(name, format!("worker task aborted: {e}"), phase_start.elapsed())
                        }
                    };
                    collected.insert(name, result);
                }
                _ = &mut expiry => {
                    hit = true;
                    break;
                }
            }
        }

        if hit {
            for def in &plan.workers {
                if !collected.contains_key(def.name) {
                    collected.insert(
                        def.name,
                        WorkerResult::timed_out(def.name, phase_start.elapsed()),
                    );
                }
            }
        }
        (collected, hit)
    }
}

/// One worker invocation: permit, then rate token, then the call under its
/// declared timeout. Queue waits do not count against the worker's timeout.
async fn invoke_worker(
    name: &'static str,
    mut service: WorkerSvc,
    input: Value,
    limit: Duration,
    rate_limited: bool,
    limiter: Arc<ConcurrencyLimiter>,
    rate: Arc<AdaptiveRateLimiter>,
) -> WorkerResult {
    let _permit = limiter.acquire().await;
    if rate_limited {
        rate.wait_for_slot().await;
    }

    let started = std::time::Instant::now();
    let outcome = timeout(limit, async {
        service.ready().await?.call(input).await
    })
    .await;

    match outcome {
        Ok(Ok(payload)) => {
            if rate_limited {
                rate.record_result(true).await;
            }
            debug!(worker = name, elapsed_ms = started.elapsed().as_millis() as u64, "worker succeeded");
            WorkerResult::success(name, payload, started.elapsed())
        }
        Ok(Err(e)) => {
            if rate_limited {
                rate.record_result(false).await;
            }
            debug!(worker = name, error = %e, "worker failed");
            WorkerResult::failed(name, e.to_string(), started.elapsed())
        }
        Err(_) => {
            if rate_limited {
                rate.record_result(false).await;
            }
            debug!(worker = name, timeout_ms = limit.as_millis() as u64, "worker timed out");
            WorkerResult::timed_out(name, limit)
        }
    }
}
