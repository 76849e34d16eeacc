use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Dimension, DimensionResult, RoleVariant};

/// A persisted analysis result for one (chunk, dimension) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub dimension: Dimension,
    pub role_variant: RoleVariant,
    pub rubric_version: String,
    pub result: DimensionResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
