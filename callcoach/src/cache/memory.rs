use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SharedError;
use crate::models::DimensionResult;

#[derive(Clone)]
enum MemoryEntry {
    Value {
        result: DimensionResult,
        rubric_version: String,
        expires_at: Instant,
    },
    Failure {
        error: SharedError,
        expires_at: Instant,
    },
}

impl MemoryEntry {
    fn expires_at(&self) -> Instant {
        match self {
            MemoryEntry::Value { expires_at, .. } | MemoryEntry::Failure { expires_at, .. } => {
                *expires_at
            }
        }
    }
}

/// What the in-process tier knows about a key.
#[derive(Debug, Clone)]
pub enum MemoryHit {
    Value {
        result: DimensionResult,
        rubric_version: String,
    },
    /// A terminal failure remembered for a short while.
    Failure(SharedError),
}

/// Thread-safe LRU tier in front of the persistent cache.
///
/// Holds successful results for the same TTL as the backing store and
/// terminal failures for the short negative TTL. Expiry uses tokio's clock
/// so paused-time tests can advance it.
#[derive(Clone)]
pub struct MemoryTier {
    entries: Arc<Mutex<LruCache<String, MemoryEntry>>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<MemoryHit> {
        let mut entries = self.lock();
        let entry = entries.get(key)?.clone();

        if entry.expires_at() <= Instant::now() {
            entries.pop(key);
            return None;
        }

        Some(match entry {
            MemoryEntry::Value {
                result,
                rubric_version,
                ..
            } => MemoryHit::Value {
                result,
                rubric_version,
            },
            MemoryEntry::Failure { error, .. } => MemoryHit::Failure(error),
        })
    }

    pub fn put_value(&self, key: String, result: DimensionResult, rubric_version: String, ttl: Duration) {
        self.lock().put(
            key,
            MemoryEntry::Value {
                result,
                rubric_version,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn put_failure(&self, key: String, error: SharedError, ttl: Duration) {
        self.lock().put(
            key,
            MemoryEntry::Failure {
                error,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.lock().pop(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
