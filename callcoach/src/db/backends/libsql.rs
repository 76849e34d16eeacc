use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::connection::Database;
use crate::db::repository::{
    CacheEntryRepository, CallRepository, RubricRepository, SessionRepository,
};
use crate::db::traits::{CacheBackend, DatabaseBackend, RubricStore, SessionStore, TranscriptStore};
use crate::error::{CoachError, Result};
use crate::models::{
    CacheEntry, CallMetadata, CoachingEvaluation, Dimension, RoleVariant, RubricVersion,
    SessionSummary, TimeWindow, Transcript,
};

pub struct LibSqlBackend {
    db: Database,
}

impl LibSqlBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TranscriptStore for LibSqlBackend {
    async fn get_transcript(&self, call_id: &str) -> Result<Option<Transcript>> {
        let conn = self.db.connect()?;
        CallRepository::get_transcript(&conn, call_id).await
    }
    async fn get_call_metadata(&self, call_id: &str) -> Result<Option<CallMetadata>> {
        let conn = self.db.connect()?;
        CallRepository::get_metadata(&conn, call_id).await
    }
    async fn save_call(&self, transcript: &Transcript, metadata: &CallMetadata) -> Result<()> {
        let conn = self.db.connect()?;
        CallRepository::save(&conn, transcript, metadata).await
    }
    async fn set_evaluated_role(&self, call_id: &str, role: RoleVariant) -> Result<bool> {
        let conn = self.db.connect()?;
        CallRepository::set_evaluated_role(&conn, call_id, role).await
    }
}

#[async_trait]
impl RubricStore for LibSqlBackend {
    async fn get_rubric(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        version: Option<&str>,
    ) -> Result<Option<RubricVersion>> {
        let conn = self.db.connect()?;
        let version = match version {
            Some(version) => version.to_string(),
            None => match RubricRepository::get_active_version(&conn, dimension, role).await? {
                Some(active) => active,
                None => return Ok(None),
            },
        };
        RubricRepository::get(&conn, dimension, role, &version).await
    }
    async fn get_active_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
    ) -> Result<Option<String>> {
        let conn = self.db.connect()?;
        RubricRepository::get_active_version(&conn, dimension, role).await
    }
    async fn publish_rubric(&self, rubric: &RubricVersion) -> Result<bool> {
        let conn = self.db.connect()?;
        RubricRepository::insert(&conn, rubric).await
    }
}

/// Database failures on the cache path are reported as `CacheStore` so the
/// analysis cache can degrade instead of failing the request.
fn cache_store_error(error: CoachError) -> CoachError {
    match error {
        CoachError::CacheStore(_) => error,
        other => CoachError::CacheStore(other.to_string()),
    }
}

#[async_trait]
impl CacheBackend for LibSqlBackend {
    async fn get_cache_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.db.connect().map_err(cache_store_error)?;
        CacheEntryRepository::get(&conn, key)
            .await
            .map_err(cache_store_error)
    }
    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.db.connect().map_err(cache_store_error)?;
        CacheEntryRepository::upsert(&conn, entry)
            .await
            .map_err(cache_store_error)
    }
    async fn active_rubric_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
    ) -> Result<Option<String>> {
        let conn = self.db.connect().map_err(cache_store_error)?;
        RubricRepository::get_active_version(&conn, dimension, role)
            .await
            .map_err(cache_store_error)
    }
    async fn compare_and_set_active_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        expected: Option<&str>,
        new_version: &str,
    ) -> Result<bool> {
        let conn = self.db.connect()?;
        RubricRepository::compare_and_set_active(&conn, dimension, role, expected, new_version).await
    }
    async fn invalidate_superseded(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        active_version: &str,
    ) -> Result<u64> {
        let conn = self.db.connect()?;
        CacheEntryRepository::invalidate_superseded(&conn, dimension, role, active_version).await
    }
    async fn purge_expired_cache(&self, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.db.connect()?;
        CacheEntryRepository::purge_expired(&conn, now).await
    }
    async fn clear_cache(&self) -> Result<u64> {
        let conn = self.db.connect()?;
        CacheEntryRepository::clear(&conn).await
    }
}

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn save_evaluation(&self, call_id: &str, evaluation: &CoachingEvaluation) -> Result<()> {
        if evaluation.call_id != call_id {
            return Err(CoachError::Validation(format!(
                "Evaluation for {} cannot be stored under {call_id}",
                evaluation.call_id
            )));
        }
        let conn = self.db.connect()?;
        SessionRepository::save(&conn, evaluation).await
    }
    async fn get_evaluation(&self, call_id: &str) -> Result<Option<CoachingEvaluation>> {
        let conn = self.db.connect()?;
        SessionRepository::get(&conn, call_id).await
    }
    async fn list_evaluations(
        &self,
        role: RoleVariant,
        window: &TimeWindow,
    ) -> Result<Vec<SessionSummary>> {
        let conn = self.db.connect()?;
        SessionRepository::list(&conn, role, window).await
    }
    async fn latest_role_for_rep(&self, rep_email: &str) -> Result<Option<RoleVariant>> {
        let conn = self.db.connect()?;
        SessionRepository::latest_role_for_rep(&conn, rep_email).await
    }
    async fn team_role_counts(&self, team_id: &str) -> Result<Vec<(RoleVariant, u64)>> {
        let conn = self.db.connect()?;
        SessionRepository::team_role_counts(&conn, team_id).await
    }
}

#[async_trait]
impl DatabaseBackend for LibSqlBackend {
    async fn sync(&self) -> Result<()> {
        self.db.sync().await
    }
}
