use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::AnalysisCache;
use crate::error::Result;

/// Periodically deletes expired rows from the persistent analysis cache.
#[derive(Clone)]
pub struct CacheJanitor {
    cache: AnalysisCache,
    interval_secs: u64,
}

impl CacheJanitor {
    pub fn new(cache: AnalysisCache, interval_secs: u64) -> Self {
        Self {
            cache,
            interval_secs,
        }
    }

    /// Run a single purge pass. Returns the number of rows removed.
    pub async fn run_once(&self) -> Result<u64> {
        let purged = self.cache.purge_expired().await?;
        if purged == 0 {
            info!("No expired cache entries");
        } else {
            info!(purged, "Expired cache entries purged");
        }
        Ok(purged)
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Purge every `interval_secs` until `token` is cancelled. Failed passes
    /// are logged and retried on the next tick.
    pub async fn run(self, token: CancellationToken) {
        let interval = Duration::from_secs(self.interval_secs.max(1));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Cache purge failed");
                    }
                }
            }
        }
        info!("Cache janitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::db::testing::FlakyCacheBackend;
    use crate::db::CacheBackend;
    use crate::models::{CacheEntry, Dimension, DimensionResult, RoleVariant};
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(key: &str, expires_in: chrono::Duration) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            dimension: Dimension::Discovery,
            role_variant: RoleVariant::Ae,
            rubric_version: "v1".to_string(),
            result: DimensionResult::failed(Dimension::Discovery, "placeholder"),
            created_at: Utc::now(),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_run_once_purges_only_expired_entries() {
        let backend = Arc::new(FlakyCacheBackend::default());
        backend
            .upsert_cache_entry(&entry("old", chrono::Duration::hours(-1)))
            .await
            .unwrap();
        backend
            .upsert_cache_entry(&entry("fresh", chrono::Duration::hours(1)))
            .await
            .unwrap();

        let cache = AnalysisCache::new(backend.clone(), &CacheConfig::default());
        let janitor = CacheJanitor::new(cache, 3600);

        assert_eq!(janitor.run_once().await.unwrap(), 1);
        assert!(backend.get_cache_entry("old").await.unwrap().is_none());
        assert!(backend.get_cache_entry("fresh").await.unwrap().is_some());
        assert_eq!(janitor.run_once().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let cache = AnalysisCache::new(
            Arc::new(FlakyCacheBackend::default()),
            &CacheConfig::default(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(CacheJanitor::new(cache, 60).run(token.clone()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
