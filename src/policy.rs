//! Degradation and confidence policy
//!
//! Once the scheduler has produced its phase outcomes, the policy answers one
//! question: how much of the expected data actually arrived? The result is a
//! 0–1 confidence score attached to the final envelope. Policies are
//! injected at orchestrator construction, so deployments can swap the
//! weighting without touching the scheduler.

use crate::scheduler::PhaseOutcome;

/// Computes the confidence score for a finished (or deadline-truncated) run.
pub trait DegradationPolicy: Send + Sync {
    fn confidence(&self, outcomes: &[PhaseOutcome]) -> f64;
}

/// Default policy: start at 1.0 and multiply by `miss_factor` for every
/// worker that did not succeed, clamping at `floor`.
///
/// In a usable all-required phase the non-success workers are exactly the
/// optional ones (a required failure would have failed the phase), so this
/// matches discounting per missing optional contributor. Phase outcomes that
/// failed the request never reach this computation.
#[derive(Debug, Clone, Copy)]
pub struct WeightedConfidence {
    pub miss_factor: f64,
    pub floor: f64,
}

impl Default for WeightedConfidence {
    fn default() -> Self {
        Self {
            miss_factor: 0.85,
            floor: 0.1,
        }
    }
}

impl DegradationPolicy for WeightedConfidence {
    fn confidence(&self, outcomes: &[PhaseOutcome]) -> f64 {
        let mut confidence = 1.0_f64;
        for outcome in outcomes {
            for result in outcome.results.values() {
                if !result.is_success() {
                    confidence *= self.miss_factor;
                }
            }
        }
        confidence.max(self.floor).min(1.0)
    }
}
