use std::collections::HashMap;

use serde::Serialize;

use crate::config::{AnalysisConfig, RoleFallbackPolicy};
use crate::db::SessionStore;
use crate::error::Result;
use crate::models::{CallMetadata, Participant, RoleVariant, Segment};

/// Where the evaluated role came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Override,
    PrimarySpeaker,
    TeamMajority,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDecision {
    pub role: RoleVariant,
    pub source: RoleSource,
    pub primary_speaker: Option<Participant>,
}

/// Picks the rubric role for a call. The decision is made once per request
/// and every dimension uses it.
#[derive(Debug, Clone)]
pub struct RoleSelector {
    fallback: RoleFallbackPolicy,
    default_role: RoleVariant,
}

impl RoleSelector {
    pub fn new(fallback: RoleFallbackPolicy, default_role: RoleVariant) -> Self {
        let default_role = if default_role.is_assigned() {
            default_role
        } else {
            RoleVariant::Ae
        };
        Self {
            fallback,
            default_role,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.role_fallback, config.default_role)
    }

    pub async fn select_role(
        &self,
        metadata: &CallMetadata,
        segments: &[Segment],
        override_role: Option<RoleVariant>,
        sessions: &dyn SessionStore,
    ) -> Result<RoleDecision> {
        let primary = primary_speaker(&metadata.participants, segments).cloned();

        if let Some(role) = override_role.filter(RoleVariant::is_assigned) {
            return Ok(RoleDecision {
                role,
                source: RoleSource::Override,
                primary_speaker: primary,
            });
        }

        if let Some(role) = primary
            .as_ref()
            .map(|p| p.role)
            .filter(RoleVariant::is_assigned)
        {
            return Ok(RoleDecision {
                role,
                source: RoleSource::PrimarySpeaker,
                primary_speaker: primary,
            });
        }

        if self.fallback == RoleFallbackPolicy::TeamMajority {
            if let Some(team_id) = primary.as_ref().and_then(|p| p.team_id.as_deref()) {
                let counts = sessions.team_role_counts(team_id).await?;
                if let Some(role) = majority_role(&counts) {
                    tracing::debug!(team_id, role = %role, "Role taken from team majority");
                    return Ok(RoleDecision {
                        role,
                        source: RoleSource::TeamMajority,
                        primary_speaker: primary,
                    });
                }
            }
        }

        Ok(RoleDecision {
            role: self.default_role,
            source: RoleSource::Default,
            primary_speaker: primary,
        })
    }
}

/// Counts arrive ordered by count descending, then role; the first assigned
/// role wins.
fn majority_role(counts: &[(RoleVariant, u64)]) -> Option<RoleVariant> {
    counts
        .iter()
        .find(|(role, count)| role.is_assigned() && *count > 0)
        .map(|(role, _)| *role)
}

/// Internal participant with the most talk time. Ties go to the
/// lexicographically smallest email so the choice never depends on input order.
pub fn primary_speaker<'a>(
    participants: &'a [Participant],
    segments: &[Segment],
) -> Option<&'a Participant> {
    let mut talk_time: HashMap<usize, f64> = HashMap::new();
    for segment in segments {
        if let Some(idx) = participants
            .iter()
            .position(|p| p.is_internal && p.matches_speaker(&segment.speaker))
        {
            *talk_time.entry(idx).or_default() += segment.duration();
        }
    }

    participants
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_internal)
        .map(|(idx, p)| (p, talk_time.get(&idx).copied().unwrap_or(0.0)))
        .max_by(|(a, a_time), (b, b_time)| {
            a_time
                .total_cmp(b_time)
                .then_with(|| b.email.to_lowercase().cmp(&a.email.to_lowercase()))
        })
        .map(|(p, _)| p)
}
