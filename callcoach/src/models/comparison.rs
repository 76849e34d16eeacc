use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Dimension, RoleVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days.max(0)),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Read-side projection of a persisted coaching session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub call_id: String,
    pub rep_email: String,
    pub role_variant: RoleVariant,
    pub overall_score: Option<f64>,
    /// Scores of the dimensions that succeeded.
    pub dimension_scores: BTreeMap<Dimension, f64>,
    pub evaluated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn score_for(&self, dimension: Option<Dimension>) -> Option<f64> {
        match dimension {
            Some(d) => self.dimension_scores.get(&d).copied(),
            None => self.overall_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerComparison {
    pub rep_email: String,
    /// `None` compares overall scores.
    pub dimension: Option<Dimension>,
    pub role_variant: RoleVariant,
    pub rep_score: Option<f64>,
    pub peer_average: Option<f64>,
    /// Share of peers scoring below the rep (ties count half), 0–100.
    pub percentile: Option<f64>,
    pub sample_size: usize,
    pub window: TimeWindow,
}

impl PeerComparison {
    pub fn no_peers(
        rep_email: &str,
        dimension: Option<Dimension>,
        role_variant: RoleVariant,
        rep_score: Option<f64>,
        window: TimeWindow,
    ) -> Self {
        Self {
            rep_email: rep_email.to_string(),
            dimension,
            role_variant,
            rep_score,
            peer_average: None,
            percentile: None,
            sample_size: 0,
            window,
        }
    }

    pub fn has_peers(&self) -> bool {
        self.sample_size > 0
    }
}
