//! In-process cache tier: bounded LRU with lazy TTL expiry
//!
//! Capacity eviction is least-recently-used; expiry is checked on read and
//! stale entries are dropped at that point rather than by a background
//! sweeper.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;

use crate::error::Result;

use super::CacheTier;

#[derive(Debug)]
struct StoredEntry {
    value: Value,
    expires_at: Instant,
}

/// The default tier-1 backend. Also usable as a medium/slow stand-in for
/// tests and single-process deployments.
#[derive(Debug)]
pub struct MemoryTier {
    name: String,
    entries: Mutex<LruCache<String, StoredEntry>>,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("nonzero capacity");
        Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Create a tier with no capacity bound; entries only leave via TTL or
    /// explicit delete.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Number of live entries, counting any not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().unwrap();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let entry = StoredEntry {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().unwrap().put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().pop(key);
        Ok(())
    }
}
