use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::RoleVariant;

/// One axis of coaching evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Discovery,
    Engagement,
    ObjectionHandling,
    ProductKnowledge,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Self::Discovery,
        Self::Engagement,
        Self::ObjectionHandling,
        Self::ProductKnowledge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Engagement => "engagement",
            Self::ObjectionHandling => "objection_handling",
            Self::ProductKnowledge => "product_knowledge",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Discovery => "Discovery",
            Self::Engagement => "Engagement",
            Self::ObjectionHandling => "Objection Handling",
            Self::ProductKnowledge => "Product Knowledge",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "discovery" => Ok(Self::Discovery),
            "engagement" => Ok(Self::Engagement),
            "objection_handling" | "objections" => Ok(Self::ObjectionHandling),
            "product_knowledge" => Ok(Self::ProductKnowledge),
            _ => Err(format!("Unknown dimension: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Criterion {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 0.0))]
    pub weight: f64,
    /// Free-form description of what counts as evidence for this criterion.
    #[serde(default)]
    pub evidence_schema: String,
}

/// Published, immutable scoring criteria for one (dimension, role) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricVersion {
    pub version_id: String,
    pub dimension: Dimension,
    pub role_variant: RoleVariant,
    pub criteria: Vec<Criterion>,
    pub published_at: DateTime<Utc>,
}

/// Fixture format accepted by `callcoach publish-rubric`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PublishRubricRequest {
    #[validate(length(min = 1, max = 64))]
    pub version_id: String,
    pub dimension: Dimension,
    pub role_variant: RoleVariant,
    #[validate(length(min = 1), nested)]
    pub criteria: Vec<Criterion>,
}

impl PublishRubricRequest {
    pub fn into_rubric(self) -> RubricVersion {
        RubricVersion {
            version_id: self.version_id,
            dimension: self.dimension,
            role_variant: self.role_variant,
            criteria: self.criteria,
            published_at: Utc::now(),
        }
    }
}
