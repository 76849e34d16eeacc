use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Dimension, RoleVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub summary: String,
    pub impact: Impact,
}

/// One dimension's evaluation, either for a single chunk or merged across
/// all chunks of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    pub dimension: Dimension,
    pub score: f64,
    pub evidence: Vec<Evidence>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DimensionResult {
    pub const MAX_SCORE: f64 = 100.0;

    pub fn failed(dimension: Dimension, reason: impl Into<String>) -> Self {
        Self {
            dimension,
            score: 0.0,
            evidence: Vec::new(),
            strengths: Vec::new(),
            improvements: Vec::new(),
            error: Some(reason.into()),
            retry_count: 0,
            warnings: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinCategory {
    Business,
    Technical,
    Security,
    Commercial,
    Legal,
}

impl WinCategory {
    pub const ALL: [WinCategory; 5] = [
        Self::Business,
        Self::Technical,
        Self::Security,
        Self::Commercial,
        Self::Legal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Business => "Business Win",
            Self::Technical => "Technical Win",
            Self::Security => "Security Win",
            Self::Commercial => "Commercial Win",
            Self::Legal => "Legal Win",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinStatus {
    Met,
    Partial,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Win {
    pub category: WinCategory,
    pub name: String,
    pub score: f64,
    pub max_score: f64,
    pub status: WinStatus,
    pub evidence: Vec<Evidence>,
    pub contributing_dimensions: Vec<Dimension>,
    pub error: Option<String>,
}

/// The primary "Five Wins" framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiveWinsEvaluation {
    pub mapping_version: String,
    pub wins: Vec<Win>,
    pub total_score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplementaryFramework {
    pub dimension: Dimension,
    pub framework: String,
    pub score: Option<f64>,
    pub max_score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingEvaluation {
    pub call_id: String,
    pub evaluated_as_role: RoleVariant,
    pub rep_email: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    pub primary_framework: FiveWinsEvaluation,
    pub supplementary_frameworks: Vec<SupplementaryFramework>,
    pub dimension_results: BTreeMap<Dimension, DimensionResult>,
    /// Mean of the dimensions that produced a result; `None` only when none did.
    pub overall_score: Option<f64>,
    /// True when at least one requested dimension failed or timed out.
    pub incomplete: bool,
    pub narrative: String,
    pub next_action: Option<String>,
    /// Rubric version each analyzed dimension was scored against.
    #[serde(default)]
    pub rubric_versions: BTreeMap<Dimension, String>,
    pub evaluated_at: DateTime<Utc>,
}

impl CoachingEvaluation {
    pub fn dimensions(&self) -> Vec<Dimension> {
        self.dimension_results.keys().copied().collect()
    }

    pub fn failed_dimensions(&self) -> Vec<Dimension> {
        self.dimension_results
            .values()
            .filter(|r| r.is_failed())
            .map(|r| r.dimension)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    #[serde(default)]
    pub force_reanalysis: bool,
    #[serde(default)]
    pub role_override: Option<RoleVariant>,
    /// Dimension names; `None` analyzes every dimension.
    #[serde(default)]
    pub dimensions: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_has_error_and_zero_score() {
        let result = DimensionResult::failed(Dimension::Engagement, "timeout");
        assert!(result.is_failed());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_dimension_result_map_serializes_with_string_keys() {
        let mut map = BTreeMap::new();
        map.insert(
            Dimension::Discovery,
            DimensionResult::failed(Dimension::Discovery, "boom"),
        );
        let json = serde_json::to_value(&map).unwrap();
        assert!(json.get("discovery").is_some());

        let back: BTreeMap<Dimension, DimensionResult> = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_win_category_names() {
        let names: Vec<&str> = WinCategory::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 5);
        assert!(names.contains(&"Technical Win"));
    }
}
