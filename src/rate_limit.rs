//! Adaptive token-bucket rate limiting for the shared reasoning backend
//!
//! Every worker call against the shared external dependency flows through one
//! process-wide `AdaptiveRateLimiter`. The bucket refills at a rate that
//! adapts to observed outcomes: a high error rate over the rolling window
//! shrinks the rate aggressively, a clean full window grows it back
//! conservatively. The rate is clamped to `[min_rate, max_rate]` so a burst
//! of failures can never silence the system entirely — it keeps probing for
//! recovery at the floor rate.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Outcomes below this count are too noisy to adapt on.
const MIN_SAMPLES: usize = 10;

#[derive(Debug)]
struct RateState {
    rate: f64,
    tokens: f64,
    last_refill: Instant,
    window: VecDeque<bool>,
}

/// Token bucket whose refill rate tracks the health of the downstream
/// dependency.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    cfg: RateLimitConfig,
    state: Mutex<RateState>,
}

impl AdaptiveRateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        let rate = cfg.rate.clamp(cfg.min_rate, cfg.max_rate);
        Self {
            state: Mutex::new(RateState {
                rate,
                tokens: cfg.burst,
                last_refill: Instant::now(),
                window: VecDeque::with_capacity(cfg.window),
            }),
            cfg,
        }
    }

    /// Non-blocking check: take a token if one is available.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Suspend until a token is available, then take it.
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Time until the deficit refills at the current rate
                Duration::from_secs_f64((1.0 - state.tokens) / state.rate)
            };
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Report the outcome of a call that consumed a token. Drives the
    /// adaptive rate adjustment.
    pub async fn record_result(&self, success: bool) {
        let mut state = self.state.lock().await;
        if state.window.len() == self.cfg.window {
            state.window.pop_front();
        }
        state.window.push_back(success);

        let samples = state.window.len();
        if samples < MIN_SAMPLES {
            return;
        }
        let errors = state.window.iter().filter(|ok| !**ok).count();
        let error_rate = errors as f64 / samples as f64;

        if error_rate > self.cfg.high_error_threshold {
            let next = (state.rate * self.cfg.shrink_factor).max(self.cfg.min_rate);
            if next < state.rate {
                warn!(
                    error_rate,
                    from = state.rate,
                    to = next,
                    "rate limiter shrinking"
                );
                state.rate = next;
            }
        } else if samples == self.cfg.window && error_rate < self.cfg.low_error_threshold {
            let next = (state.rate * self.cfg.grow_factor).min(self.cfg.max_rate);
            if next > state.rate {
                debug!(from = state.rate, to = next, "rate limiter growing");
                state.rate = next;
            }
        }
        state.tokens = state.tokens.min(self.cfg.burst);
    }

    /// Current refill rate in tokens per second.
    pub async fn current_rate(&self) -> f64 {
        self.state.lock().await.rate
    }

    fn refill(&self, state: &mut RateState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * state.rate).min(self.cfg.burst);
    }
}
