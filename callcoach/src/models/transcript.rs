use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// Business role used to pick a rubric variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleVariant {
    Ae,
    Se,
    Csm,
    Support,
    #[default]
    Unassigned,
}

impl RoleVariant {
    /// Roles that have their own rubric variants.
    pub const ASSIGNABLE: [RoleVariant; 4] = [Self::Ae, Self::Se, Self::Csm, Self::Support];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ae => "ae",
            Self::Se => "se",
            Self::Csm => "csm",
            Self::Support => "support",
            Self::Unassigned => "unassigned",
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self, Self::Unassigned)
    }
}

impl std::fmt::Display for RoleVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoleVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ae" | "account_executive" => Ok(Self::Ae),
            "se" | "sales_engineer" => Ok(Self::Se),
            "csm" | "customer_success" | "customer_success_manager" => Ok(Self::Csm),
            "support" => Ok(Self::Support),
            "unassigned" | "none" | "" => Ok(Self::Unassigned),
            _ => Err(format!("Unknown role variant: {s}")),
        }
    }
}

fn deserialize_role<'de, D>(deserializer: D) -> Result<RoleVariant, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RoleVariant>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: String,
    /// Seconds from the start of the call.
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub call_id: String,
    pub segments: Vec<Segment>,
    pub total_duration: f64,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_role")]
    pub role: RoleVariant,
    pub is_internal: bool,
}

impl Participant {
    /// Transcripts label speakers by display name or by email.
    pub fn matches_speaker(&self, speaker: &str) -> bool {
        let speaker = speaker.trim();
        speaker.eq_ignore_ascii_case(&self.email)
            || self
                .name
                .as_deref()
                .is_some_and(|name| speaker.eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub call_id: String,
    pub duration: f64,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub evaluated_role: Option<RoleVariant>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Fixture format accepted by `callcoach import-call`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ImportCallRequest {
    #[validate(length(min = 1, max = 128))]
    pub call_id: String,
    #[validate(length(min = 1))]
    pub segments: Vec<Segment>,
    #[validate(length(min = 1))]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl ImportCallRequest {
    pub fn into_parts(self) -> (Transcript, CallMetadata) {
        let total_duration = self.duration.unwrap_or_else(|| {
            self.segments
                .iter()
                .map(|s| s.end_time)
                .fold(0.0_f64, f64::max)
        });

        let transcript = Transcript {
            call_id: self.call_id.clone(),
            segments: self.segments,
            total_duration,
        };
        let metadata = CallMetadata {
            call_id: self.call_id,
            duration: total_duration,
            participants: self.participants,
            evaluated_role: None,
            recorded_at: self.recorded_at,
        };

        (transcript, metadata)
    }
}
