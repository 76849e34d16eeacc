use std::ops::Range;

use serde::Deserialize;

use crate::error::{CoachError, Result};
use crate::models::{Dimension, DimensionResult, Evidence, Impact};

/// Evidence item exactly as the model must return it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseEvidence {
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub summary: String,
    pub impact: Impact,
}

/// The only response shape accepted from the model for a dimension.
/// Unknown fields are rejected so a drifting prompt shows up as a schema
/// error instead of silently losing data.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionResponse {
    pub score: f64,
    pub evidence: Vec<ResponseEvidence>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

fn schema_error(message: impl Into<String>, raw: &str) -> CoachError {
    CoachError::Schema {
        message: message.into(),
        raw: raw.to_string(),
    }
}

/// Models like to wrap JSON in a markdown fence even when told not to.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse and validate a raw model response into a per-chunk result.
///
/// Scores outside 0–100, non-finite timestamps and reversed time ranges are
/// schema errors. Timestamps inside a valid range are clamped to `window`,
/// the span of transcript the model was shown.
pub fn parse_dimension_response(
    raw: &str,
    dimension: Dimension,
    window: Range<f64>,
) -> Result<DimensionResult> {
    let body = strip_code_fence(raw);
    let response: DimensionResponse =
        serde_json::from_str(body).map_err(|e| schema_error(e.to_string(), raw))?;

    if !response.score.is_finite()
        || response.score < 0.0
        || response.score > DimensionResult::MAX_SCORE
    {
        return Err(schema_error(
            format!("score {} is outside 0-100", response.score),
            raw,
        ));
    }

    let (lower, upper) = if window.start.is_finite()
        && window.end.is_finite()
        && window.start < window.end
    {
        (window.start.max(0.0), window.end)
    } else {
        (0.0, f64::MAX)
    };

    let mut evidence = Vec::with_capacity(response.evidence.len());
    for (i, item) in response.evidence.into_iter().enumerate() {
        if !item.timestamp_start.is_finite() || !item.timestamp_end.is_finite() {
            return Err(schema_error(
                format!("evidence[{i}] has a non-numeric timestamp"),
                raw,
            ));
        }
        if item.timestamp_start > item.timestamp_end {
            return Err(schema_error(
                format!(
                    "evidence[{i}] starts at {} after it ends at {}",
                    item.timestamp_start, item.timestamp_end
                ),
                raw,
            ));
        }
        let summary = item.summary.trim();
        if summary.is_empty() {
            return Err(schema_error(format!("evidence[{i}] has an empty summary"), raw));
        }

        evidence.push(Evidence {
            timestamp_start: item.timestamp_start.clamp(lower, upper),
            timestamp_end: item.timestamp_end.clamp(lower, upper),
            summary: summary.to_string(),
            impact: item.impact,
        });
    }

    Ok(DimensionResult {
        dimension,
        score: response.score,
        evidence,
        strengths: clean_list(response.strengths),
        improvements: clean_list(response.improvements),
        error: None,
        retry_count: 0,
        warnings: Vec::new(),
    })
}
