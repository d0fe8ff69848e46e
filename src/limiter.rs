//! Global bound on simultaneously in-flight worker invocations
//!
//! One `ConcurrencyLimiter` is shared by every request passing through an
//! orchestrator, so total parallel worker execution is capped system-wide
//! rather than per-request. Acquire never fails; it only waits. Callers that
//! need a deadline layer one on top (the scheduler does).

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Semaphore-backed concurrency bound with FIFO wake order.
///
/// The returned permit releases its slot on drop.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Suspend until fewer than `limit` permits are outstanding, then take a
    /// slot. The semaphore is never closed, so acquisition cannot fail.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore")
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn acquire_blocks_at_limit() {
        let limiter = ConcurrencyLimiter::new(2);
        let p1 = limiter.acquire().await;
        let _p2 = limiter.acquire().await;
        assert_eq!(limiter.available(), 0);

        // Third acquire must not complete while both permits are held
        let third = timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(third.is_err());

        drop(p1);
        let third = timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn bounds_concurrent_tasks() {
        static CURRENT: AtomicUsize = AtomicUsize::new(0);
        static MAX_OBSERVED: AtomicUsize = AtomicUsize::new(0);

        let limiter = Arc::new(ConcurrencyLimiter::new(3));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                let now = CURRENT.fetch_add(1, Ordering::SeqCst) + 1;
                MAX_OBSERVED.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                CURRENT.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(MAX_OBSERVED.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
        let _p = limiter.acquire().await;
    }
}
