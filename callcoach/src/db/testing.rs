use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{CacheBackend, SessionStore};
use crate::error::{CoachError, Result};
use crate::models::{
    CacheEntry, CoachingEvaluation, Dimension, RoleVariant, SessionSummary, TimeWindow,
};

/// In-memory cache store whose availability can be toggled.
#[derive(Default)]
pub(crate) struct FlakyCacheBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
    active: Mutex<HashMap<(Dimension, RoleVariant), String>>,
    unavailable: AtomicBool,
}

impl FlakyCacheBackend {
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn set_active(&self, dimension: Dimension, role: RoleVariant, version: &str) {
        self.active
            .lock()
            .unwrap()
            .insert((dimension, role), version.to_string());
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CoachError::CacheStore("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyCacheBackend {
    async fn get_cache_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn active_rubric_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
    ) -> Result<Option<String>> {
        self.check()?;
        Ok(self.active.lock().unwrap().get(&(dimension, role)).cloned())
    }

    async fn compare_and_set_active_version(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        expected: Option<&str>,
        new_version: &str,
    ) -> Result<bool> {
        self.check()?;
        let mut active = self.active.lock().unwrap();
        let current = active.get(&(dimension, role)).map(String::as_str);
        if current != expected {
            return Ok(false);
        }
        active.insert((dimension, role), new_version.to_string());
        Ok(true)
    }

    async fn invalidate_superseded(
        &self,
        dimension: Dimension,
        role: RoleVariant,
        active_version: &str,
    ) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| {
            e.dimension != dimension || e.role_variant != role || e.rubric_version == active_version
        });
        Ok((before - entries.len()) as u64)
    }

    async fn purge_expired_cache(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        Ok((before - entries.len()) as u64)
    }

    async fn clear_cache(&self) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }
}

/// Session store backed by fixed summaries, for role and comparison tests.
#[derive(Default)]
pub(crate) struct StaticSessions {
    summaries: Vec<SessionSummary>,
    team_counts: Vec<(RoleVariant, u64)>,
    saved: Mutex<HashMap<String, CoachingEvaluation>>,
}

impl StaticSessions {
    pub(crate) fn with_team_counts(team_counts: Vec<(RoleVariant, u64)>) -> Self {
        Self {
            team_counts,
            ..Default::default()
        }
    }

    pub(crate) fn with_summaries(summaries: Vec<SessionSummary>) -> Self {
        Self {
            summaries,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SessionStore for StaticSessions {
    async fn save_evaluation(&self, call_id: &str, evaluation: &CoachingEvaluation) -> Result<()> {
        self.saved
            .lock()
            .unwrap()
            .insert(call_id.to_string(), evaluation.clone());
        Ok(())
    }

    async fn get_evaluation(&self, call_id: &str) -> Result<Option<CoachingEvaluation>> {
        Ok(self.saved.lock().unwrap().get(call_id).cloned())
    }

    async fn list_evaluations(
        &self,
        role: RoleVariant,
        window: &TimeWindow,
    ) -> Result<Vec<SessionSummary>> {
        Ok(self
            .summaries
            .iter()
            .filter(|s| s.role_variant == role && window.contains(s.evaluated_at))
            .cloned()
            .collect())
    }

    async fn latest_role_for_rep(&self, rep_email: &str) -> Result<Option<RoleVariant>> {
        Ok(self
            .summaries
            .iter()
            .filter(|s| s.rep_email.eq_ignore_ascii_case(rep_email))
            .max_by_key(|s| s.evaluated_at)
            .map(|s| s.role_variant))
    }

    async fn team_role_counts(&self, _team_id: &str) -> Result<Vec<(RoleVariant, u64)>> {
        Ok(self.team_counts.clone())
    }
}
