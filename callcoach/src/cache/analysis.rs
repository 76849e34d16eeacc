use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::db::CacheBackend;
use crate::error::{CoachError, Result, SharedError};
use crate::models::{CacheEntry, Dimension, DimensionResult, RoleVariant};

use super::memory::{MemoryHit, MemoryTier};
use super::single_flight::SingleFlight;

/// Rubric context a cached result belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheScope {
    pub dimension: Dimension,
    pub role: RoleVariant,
    pub rubric_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub value: DimensionResult,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CachePolicy {
    /// Skip reads but still write the fresh result.
    pub force_refresh: bool,
}

pub type CacheOutcome = std::result::Result<CacheLookup, SharedError>;

/// Two-tier, single-flight cache for per-chunk dimension results.
///
/// Reads go to the in-process LRU first, then the backing store. A stored
/// entry only counts as a hit while its rubric version is the active one for
/// its dimension and role. When the backing store fails the cache logs a
/// `cache_fallback` event and behaves as a miss, so analysis still runs.
#[derive(Clone)]
pub struct AnalysisCache {
    backend: Arc<dyn CacheBackend>,
    memory: MemoryTier,
    flights: SingleFlight<CacheOutcome>,
    ttl: chrono::Duration,
    negative_ttl: Duration,
    is_terminal: fn(&CoachError) -> bool,
}

impl AnalysisCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            memory: MemoryTier::new(config.memory_capacity),
            flights: SingleFlight::new(),
            ttl: config.ttl(),
            negative_ttl: config.negative_ttl(),
            is_terminal: CoachError::is_validation,
        }
    }

    /// Failures matching `is_terminal` are remembered in memory for the
    /// negative TTL instead of being recomputed on every request.
    pub fn with_terminal_failures(mut self, is_terminal: fn(&CoachError) -> bool) -> Self {
        self.is_terminal = is_terminal;
        self
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        scope: &CacheScope,
        policy: CachePolicy,
        compute: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<DimensionResult>> + Send + 'static,
    {
        if !policy.force_refresh {
            if let Some(value) = self.lookup(key, scope).await? {
                return Ok(CacheLookup {
                    value,
                    cache_hit: true,
                });
            }
        }

        let flight_key = if policy.force_refresh {
            format!("{key}#refresh")
        } else {
            key.to_string()
        };

        let this = self.clone();
        let owned_key = key.to_string();
        let owned_scope = scope.clone();

        self.flights
            .run(&flight_key, move || async move {
                this.compute_and_store(owned_key, owned_scope, policy, compute)
                    .await
            })
            .await
            .value
    }

    async fn compute_and_store<F, Fut>(
        &self,
        key: String,
        scope: CacheScope,
        policy: CachePolicy,
        compute: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DimensionResult>>,
    {
        // Another flight may have finished between our miss and taking the lead.
        if !policy.force_refresh {
            if let Some(value) = self.lookup(&key, &scope).await? {
                return Ok(CacheLookup {
                    value,
                    cache_hit: true,
                });
            }
        }

        match compute().await {
            Ok(value) => {
                self.store(&key, &scope, &value).await;
                Ok(CacheLookup {
                    value,
                    cache_hit: false,
                })
            }
            Err(error) => {
                let error = Arc::new(error);
                if (self.is_terminal)(&error) {
                    self.memory
                        .put_failure(key, Arc::clone(&error), self.negative_ttl);
                }
                Err(error)
            }
        }
    }

    /// `Err` only for a remembered terminal failure.
    async fn lookup(
        &self,
        key: &str,
        scope: &CacheScope,
    ) -> std::result::Result<Option<DimensionResult>, SharedError> {
        match self.memory.get(key) {
            Some(MemoryHit::Failure(error)) => return Err(error),
            Some(MemoryHit::Value {
                result,
                rubric_version,
            }) => {
                if self.is_current(&rubric_version, scope).await {
                    return Ok(Some(result));
                }
                self.memory.remove(key);
            }
            None => {}
        }

        let entry = match self.backend.get_cache_entry(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(event = "cache_fallback", key, error = %e, "Cache read failed, computing uncached");
                return Ok(None);
            }
        };

        let now = Utc::now();
        if entry.is_expired_at(now) {
            debug!(key, "Cache entry expired");
            return Ok(None);
        }
        if !self.is_current(&entry.rubric_version, scope).await {
            debug!(
                key,
                stored_version = %entry.rubric_version,
                dimension = %scope.dimension,
                "Cache entry belongs to a superseded rubric"
            );
            return Ok(None);
        }

        let remaining = (entry.expires_at - now).to_std().unwrap_or(Duration::ZERO);
        self.memory.put_value(
            key.to_string(),
            entry.result.clone(),
            entry.rubric_version,
            remaining,
        );

        Ok(Some(entry.result))
    }

    async fn is_current(&self, stored_version: &str, scope: &CacheScope) -> bool {
        if stored_version != scope.rubric_version {
            return false;
        }

        match self
            .backend
            .active_rubric_version(scope.dimension, scope.role)
            .await
        {
            Ok(Some(active)) => active == stored_version,
            Ok(None) => true,
            Err(e) => {
                warn!(event = "cache_fallback", error = %e, "Active rubric lookup failed");
                true
            }
        }
    }

    async fn store(&self, key: &str, scope: &CacheScope, value: &DimensionResult) {
        if value.is_failed() {
            return;
        }

        let now = Utc::now();
        self.memory.put_value(
            key.to_string(),
            value.clone(),
            scope.rubric_version.clone(),
            self.ttl.to_std().unwrap_or(Duration::ZERO),
        );

        let entry = CacheEntry {
            key: key.to_string(),
            dimension: scope.dimension,
            role_variant: scope.role,
            rubric_version: scope.rubric_version.clone(),
            result: value.clone(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        if let Err(e) = self.backend.upsert_cache_entry(&entry).await {
            warn!(event = "cache_fallback", key, error = %e, "Cache write failed, result kept in memory only");
        }
    }

    /// Drop persisted entries of other rubric versions for a dimension/role.
    pub async fn invalidate_superseded(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        active_version: &str,
    ) -> Result<u64> {
        self.memory.clear();
        self.backend
            .invalidate_superseded(dimension, role, active_version)
            .await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.backend.purge_expired_cache(Utc::now()).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.memory.clear();
        self.backend.clear_cache().await
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}
