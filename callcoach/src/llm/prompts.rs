//! Prompt templates for dimension analysis.
//!
//! Templates use plain `format!()` interpolation so a missing variable is a
//! compile error rather than a silently empty placeholder.

use crate::models::{Dimension, RoleVariant, RubricVersion, Segment};

/// A chat prompt: system instructions plus the user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Position of a chunk inside its call, shown to the model so it does not
/// penalise a window for lacking an opening or a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPosition {
    pub index: usize,
    pub count: usize,
}

const SYSTEM_PROMPT: &str = "You are an experienced B2B sales coach. You score call \
transcripts against a rubric and cite concrete moments as evidence. You answer with \
a single JSON object and nothing else.";

const RESPONSE_SCHEMA: &str = r#"{
  "score": <number from 0 to 100>,
  "evidence": [
    {
      "timestamp_start": <seconds from call start>,
      "timestamp_end": <seconds from call start>,
      "summary": "<one sentence describing the moment>",
      "impact": "positive" | "negative" | "neutral"
    }
  ],
  "strengths": ["<short phrase>"],
  "improvements": ["<short, actionable phrase>"]
}"#;

fn dimension_focus(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::Discovery => {
            "How well the rep uncovers the customer's situation, pain, impact, \
             decision process and timeline through open, layered questions."
        }
        Dimension::Engagement => {
            "Talk/listen balance, whether the customer is actively participating, \
             and how the rep keeps the conversation two-sided."
        }
        Dimension::ObjectionHandling => {
            "How the rep listens to, acknowledges, explores and responds to \
             concerns about price, risk, security, legal terms or fit."
        }
        Dimension::ProductKnowledge => {
            "Accuracy and depth of product explanations, and whether capabilities \
             are tied back to the customer's stated needs."
        }
    }
}

/// Render transcript lines as `[start-end] speaker: text` with times in seconds.
pub fn render_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| format!("[{:.1}-{:.1}] {}: {}", s.start_time, s.end_time, s.speaker, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the analysis prompt for one dimension over one transcript window.
///
/// # Example
/// ```
/// use callcoach::llm::prompts::{dimension_analysis_prompt, ChunkPosition};
/// use callcoach::models::{Criterion, Dimension, RoleVariant, RubricVersion, Segment};
/// use chrono::Utc;
///
/// let rubric = RubricVersion {
///     version_id: "v3".to_string(),
///     dimension: Dimension::Discovery,
///     role_variant: RoleVariant::Ae,
///     criteria: vec![Criterion {
///         name: "Quantifies pain".to_string(),
///         weight: 1.0,
///         evidence_schema: "Rep asks for a number".to_string(),
///     }],
///     published_at: Utc::now(),
/// };
/// let segments = vec![Segment {
///     speaker: "Rep".to_string(),
///     start_time: 0.0,
///     end_time: 4.0,
///     text: "How many hours does that cost your team?".to_string(),
/// }];
///
/// let prompt = dimension_analysis_prompt(
///     Dimension::Discovery,
///     &rubric,
///     RoleVariant::Ae,
///     &segments,
///     ChunkPosition { index: 0, count: 1 },
/// );
/// assert!(prompt.user.contains("Quantifies pain"));
/// assert!(prompt.user.contains("How many hours"));
/// ```
pub fn dimension_analysis_prompt(
    dimension: Dimension,
    rubric: &RubricVersion,
    role: RoleVariant,
    segments: &[Segment],
    position: ChunkPosition,
) -> Prompt {
    let criteria = rubric
        .criteria
        .iter()
        .map(|c| {
            if c.evidence_schema.trim().is_empty() {
                format!("- {} (weight {})", c.name, c.weight)
            } else {
                format!("- {} (weight {}): {}", c.name, c.weight, c.evidence_schema)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let label = dimension.label();
    let focus = dimension_focus(dimension);
    let version = &rubric.version_id;
    let part = position.index + 1;
    let parts = position.count.max(1);
    let transcript = render_segments(segments);

    let user = format!(
        r#"Evaluate the {role} rep on the dimension "{label}" using rubric {version}.

Focus: {focus}

Rubric criteria:
{criteria}

This is part {part} of {parts} of the call. Judge only what happens in this part;
do not penalise it for missing an opening or a close that belongs elsewhere.

Transcript (times in seconds from call start):
{transcript}

Respond with valid JSON only, exactly in this shape:
{RESPONSE_SCHEMA}

Evidence timestamps must fall inside the transcript above."#
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Ask the model to fix a response that did not match the schema.
///
/// # Example
/// ```
/// use callcoach::llm::prompts::{schema_repair_prompt, Prompt};
///
/// let original = Prompt { system: "coach".to_string(), user: "score it".to_string() };
/// let repair = schema_repair_prompt(&original, "{\"score\": \"high\"}", "score must be a number");
/// assert!(repair.user.contains("score must be a number"));
/// assert!(repair.user.contains("score it"));
/// ```
pub fn schema_repair_prompt(original: &Prompt, raw_response: &str, problem: &str) -> Prompt {
    let request = &original.user;
    let user = format!(
        r#"{request}

Your previous answer could not be used.
Problem: {problem}

Previous answer:
{raw_response}

Answer again with a single corrected JSON object in exactly this shape and nothing else:
{RESPONSE_SCHEMA}"#
    );

    Prompt {
        system: original.system.clone(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Criterion;
    use chrono::Utc;

    fn rubric() -> RubricVersion {
        RubricVersion {
            version_id: "v7".to_string(),
            dimension: Dimension::ObjectionHandling,
            role_variant: RoleVariant::Se,
            criteria: vec![
                Criterion {
                    name: "Acknowledges the concern".to_string(),
                    weight: 0.4,
                    evidence_schema: String::new(),
                },
                Criterion {
                    name: "Resolves with proof".to_string(),
                    weight: 0.6,
                    evidence_schema: "Customer reference or demo".to_string(),
                },
            ],
            published_at: Utc::now(),
        }
    }

    fn segments() -> Vec<Segment> {
        vec![
            Segment {
                speaker: "Buyer".to_string(),
                start_time: 61.0,
                end_time: 70.5,
                text: "We worry about SSO support.".to_string(),
            },
            Segment {
                speaker: "Rep".to_string(),
                start_time: 70.5,
                end_time: 82.0,
                text: "Fair concern, let me show you our Okta setup.".to_string(),
            },
        ]
    }

    #[test]
    fn test_analysis_prompt_embeds_rubric_and_transcript() {
        let prompt = dimension_analysis_prompt(
            Dimension::ObjectionHandling,
            &rubric(),
            RoleVariant::Se,
            &segments(),
            ChunkPosition { index: 1, count: 3 },
        );

        assert!(prompt.system.contains("JSON"));
        assert!(prompt.user.contains("\"Objection Handling\""));
        assert!(prompt.user.contains("rubric v7"));
        assert!(prompt.user.contains("se rep"));
        assert!(prompt.user.contains("- Acknowledges the concern (weight 0.4)\n"));
        assert!(prompt.user.contains("Resolves with proof (weight 0.6): Customer reference"));
        assert!(prompt.user.contains("part 2 of 3"));
        assert!(prompt.user.contains("[61.0-70.5] Buyer: We worry about SSO support."));
        assert!(prompt.user.contains("\"timestamp_start\""));
    }

    #[test]
    fn test_repair_prompt_quotes_previous_answer() {
        let original = Prompt {
            system: "sys".to_string(),
            user: "original request".to_string(),
        };
        let repair = schema_repair_prompt(&original, "not json at all", "expected value at line 1");

        assert_eq!(repair.system, "sys");
        assert!(repair.user.starts_with("original request"));
        assert!(repair.user.contains("not json at all"));
        assert!(repair.user.contains("expected value at line 1"));
    }

    #[test]
    fn test_render_segments_uses_seconds() {
        let rendered = render_segments(&segments());
        assert_eq!(
            rendered.lines().next().unwrap(),
            "[61.0-70.5] Buyer: We worry about SSO support."
        );
    }
}
