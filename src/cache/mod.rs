//! Three-tier read-through cache with single-flight computation
//!
//! Lookups walk the tiers fastest-first. A hit in a slower tier is eagerly
//! back-filled into every faster tier (with the faster tier's own TTL)
//! before the value is returned, so the tiers never drift apart on the read
//! path. A miss everywhere runs the caller's compute function under a
//! per-key lock: concurrent callers for the same key share one in-flight
//! computation instead of recomputing.
//!
//! Tier backends are pluggable through [`CacheTier`]; anything offering
//! get/set/delete with a TTL qualifies. A tier that errors (unreachable
//! store, poisoned connection) is logged and treated as a miss for that
//! request — tier connectivity problems never reach the caller.

mod memory;
mod sqlite;

pub use memory::MemoryTier;
pub use sqlite::SqliteTier;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::TierTtls;
use crate::error::Result;

/// Minimal key-value contract a cache tier backend must satisfy.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Position of a tier in the hierarchy, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Fast,
    Medium,
    Slow,
}

impl TierLevel {
    fn ttl(self, ttls: &TierTtls) -> Duration {
        match self {
            TierLevel::Fast => ttls.fast,
            TierLevel::Medium => ttls.medium,
            TierLevel::Slow => ttls.slow,
        }
    }
}

/// How a `get_or_compute` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit(TierLevel),
    Computed,
}

/// Value produced by a compute function, with an opt-out for storage
/// (deadline-truncated results are returned but not cached).
#[derive(Debug, Clone)]
pub struct Computed {
    pub value: Value,
    pub store: bool,
}

impl Computed {
    pub fn cached(value: Value) -> Self {
        Self { value, store: true }
    }

    pub fn transient(value: Value) -> Self {
        Self {
            value,
            store: false,
        }
    }
}

struct TierSlot {
    level: TierLevel,
    backend: Arc<dyn CacheTier>,
}

#[derive(Debug, Default)]
struct Counters {
    fast_hits: AtomicU64,
    medium_hits: AtomicU64,
    slow_hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
}

/// Point-in-time view of cache activity, for observability endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub fast_hits: u64,
    pub medium_hits: u64,
    pub slow_hits: u64,
    pub misses: u64,
    pub computes: u64,
}

impl CacheStatsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.fast_hits + self.medium_hits + self.slow_hits
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits() as f64 / total as f64
        }
    }
}

/// The three-tier cache facade.
pub struct TieredCache {
    tiers: [TierSlot; 3],
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    counters: Counters,
}

impl TieredCache {
    pub fn new(
        fast: Arc<dyn CacheTier>,
        medium: Arc<dyn CacheTier>,
        slow: Arc<dyn CacheTier>,
    ) -> Self {
        Self {
            tiers: [
                TierSlot {
                    level: TierLevel::Fast,
                    backend: fast,
                },
                TierSlot {
                    level: TierLevel::Medium,
                    backend: medium,
                },
                TierSlot {
                    level: TierLevel::Slow,
                    backend: slow,
                },
            ],
            inflight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Look the key up across all tiers; on a miss run `compute`.
    ///
    /// Concurrent callers for the same uncached key share a single
    /// computation: late arrivals wait on a per-key lock, re-probe, and find
    /// the stored value. The per-key registry lock is held only to fetch or
    /// insert the key's entry, never across the computation itself.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttls: &TierTtls,
        compute: F,
    ) -> (Value, CacheOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Computed>,
    {
        if let Some((value, level)) = self.probe(key, ttls, true).await {
            return (value, CacheOutcome::Hit(level));
        }

        let key_lock = {
            let mut registry = self.inflight.lock().unwrap();
            registry
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // Another caller may have computed and stored while we waited.
        if let Some((value, level)) = self.probe(key, ttls, false).await {
            return (value, CacheOutcome::Hit(level));
        }

        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        let computed = compute().await;
        if computed.store {
            self.store_all(key, &computed.value, ttls).await;
        }
        {
            let mut registry = self.inflight.lock().unwrap();
            registry.remove(key);
        }
        (computed.value, CacheOutcome::Computed)
    }

    /// Remove the key from every tier. Tier errors are logged and swallowed.
    pub async fn invalidate(&self, key: &str) {
        for slot in &self.tiers {
            if let Err(e) = slot.backend.delete(key).await {
                warn!(tier = slot.backend.name(), error = %e, "cache delete failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            fast_hits: self.counters.fast_hits.load(Ordering::Relaxed),
            medium_hits: self.counters.medium_hits.load(Ordering::Relaxed),
            slow_hits: self.counters.slow_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computes: self.counters.computes.load(Ordering::Relaxed),
        }
    }

    /// Walk the tiers fastest-first. A hit is back-filled into every faster
    /// tier before returning; a tier error degrades to a miss for that tier.
    async fn probe(&self, key: &str, ttls: &TierTtls, record: bool) -> Option<(Value, TierLevel)> {
        for (idx, slot) in self.tiers.iter().enumerate() {
            match slot.backend.get(key).await {
                Ok(Some(value)) => {
                    if record {
                        self.hit_counter(slot.level).fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(tier = slot.backend.name(), key, "cache hit");
                    for faster in &self.tiers[..idx] {
                        let ttl = faster.level.ttl(ttls);
                        if let Err(e) = faster.backend.set(key, &value, ttl).await {
                            warn!(tier = faster.backend.name(), error = %e, "cache backfill failed");
                        }
                    }
                    return Some((value, slot.level));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tier = slot.backend.name(), error = %e, "cache tier unavailable, treating as miss");
                }
            }
        }
        if record {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn store_all(&self, key: &str, value: &Value, ttls: &TierTtls) {
        for slot in &self.tiers {
            let ttl = slot.level.ttl(ttls);
            if let Err(e) = slot.backend.set(key, value, ttl).await {
                warn!(tier = slot.backend.name(), error = %e, "cache store failed");
            }
        }
    }

    fn hit_counter(&self, level: TierLevel) -> &AtomicU64 {
        match level {
            TierLevel::Fast => &self.counters.fast_hits,
            TierLevel::Medium => &self.counters.medium_hits,
            TierLevel::Slow => &self.counters.slow_hits,
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("tiers", &self.tiers.iter().map(|t| t.backend.name()).collect::<Vec<_>>())
            .finish()
    }
}
