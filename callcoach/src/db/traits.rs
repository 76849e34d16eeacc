use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    CacheEntry, CallMetadata, CoachingEvaluation, Dimension, RoleVariant, RubricVersion,
    SessionSummary, TimeWindow, Transcript,
};

/// Imported call transcripts and participant metadata.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn get_transcript(&self, call_id: &str) -> Result<Option<Transcript>>;
    async fn get_call_metadata(&self, call_id: &str) -> Result<Option<CallMetadata>>;
    async fn save_call(&self, transcript: &Transcript, metadata: &CallMetadata) -> Result<()>;

    /// Record the role a call was evaluated as, so later runs reuse it.
    async fn set_evaluated_role(&self, call_id: &str, role: RoleVariant) -> Result<bool>;
}

/// Versioned scoring rubrics.
#[async_trait]
pub trait RubricStore: Send + Sync {
    /// `version = None` resolves the active version.
    async fn get_rubric(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        version: Option<&str>,
    ) -> Result<Option<RubricVersion>>;
    async fn get_active_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
    ) -> Result<Option<String>>;

    /// Store a new immutable version. Returns `false` if it already existed.
    async fn publish_rubric(&self, rubric: &RubricVersion) -> Result<bool>;
}

/// Persistent tier of the analysis cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_cache_entry(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()>;
    async fn active_rubric_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
    ) -> Result<Option<String>>;

    /// Atomically move the active-version pointer. `expected = None` only
    /// succeeds when no pointer exists yet.
    async fn compare_and_set_active_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        expected: Option<&str>,
        new_version: &str,
    ) -> Result<bool>;
    async fn invalidate_superseded(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        active_version: &str,
    ) -> Result<u64>;
    async fn purge_expired_cache(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn clear_cache(&self) -> Result<u64>;
}

/// Persisted coaching evaluations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_evaluation(&self, call_id: &str, evaluation: &CoachingEvaluation) -> Result<()>;
    async fn get_evaluation(&self, call_id: &str) -> Result<Option<CoachingEvaluation>>;
    async fn list_evaluations(
        &self,
        role: RoleVariant,
        window: &TimeWindow,
    ) -> Result<Vec<SessionSummary>>;
    async fn latest_role_for_rep(&self, rep_email: &str) -> Result<Option<RoleVariant>>;
    async fn team_role_counts(&self, team_id: &str) -> Result<Vec<(RoleVariant, u64)>>;
}

/// A complete database backend combining every store plus lifecycle hooks.
#[async_trait]
pub trait DatabaseBackend: TranscriptStore + RubricStore + CacheBackend + SessionStore {
    /// Sync with remote (e.g. Turso replication). No-op for local-only backends.
    async fn sync(&self) -> Result<()>;
}
