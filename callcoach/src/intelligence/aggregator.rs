use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{CoachError, Result};
use crate::models::{
    CoachingEvaluation, Dimension, DimensionResult, Evidence, FiveWinsEvaluation, Participant,
    RoleVariant, SupplementaryFramework, Win, WinCategory, WinStatus,
};

/// Version of the dimension-to-win mapping below. Stored with every
/// evaluation so old sessions stay interpretable after the mapping changes.
pub const FIVE_WINS_MAPPING_VERSION: &str = "five-wins.v1";

const WIN_MAX_SCORE: f64 = 20.0;
const MET_RATIO: f64 = 0.75;
const PARTIAL_RATIO: f64 = 0.40;
const MAX_WIN_EVIDENCE: usize = 5;

/// Contributing dimensions and their weights for each win.
fn win_weights(category: WinCategory) -> &'static [(Dimension, f64)] {
    match category {
        WinCategory::Business => &[(Dimension::Discovery, 0.6), (Dimension::Engagement, 0.4)],
        WinCategory::Technical => &[
            (Dimension::ProductKnowledge, 0.7),
            (Dimension::Discovery, 0.3),
        ],
        WinCategory::Security => &[
            (Dimension::ProductKnowledge, 0.5),
            (Dimension::ObjectionHandling, 0.5),
        ],
        WinCategory::Commercial => &[
            (Dimension::ObjectionHandling, 0.6),
            (Dimension::Engagement, 0.4),
        ],
        WinCategory::Legal => &[
            (Dimension::ObjectionHandling, 0.5),
            (Dimension::Engagement, 0.5),
        ],
    }
}

pub fn supplementary_framework_name(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::Discovery => "SPICED",
        Dimension::Engagement => "Talk Ratio & Engagement",
        Dimension::ObjectionHandling => "LAER",
        Dimension::ProductKnowledge => "Value Articulation",
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Combines merged per-dimension results into the final evaluation.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Fails only when no dimension produced a result; any partial outcome
    /// is returned with `incomplete` set.
    pub fn aggregate(
        &self,
        call_id: &str,
        results: BTreeMap<Dimension, DimensionResult>,
        evaluated_as_role: RoleVariant,
        rep: Option<&Participant>,
    ) -> Result<CoachingEvaluation> {
        let available: Vec<&DimensionResult> =
            results.values().filter(|r| !r.is_failed()).collect();

        if available.is_empty() {
            let reasons = results
                .values()
                .map(|r| format!("{}: {}", r.dimension, r.error.as_deref().unwrap_or("no result")))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CoachError::AllDimensionsFailed(if reasons.is_empty() {
                "no dimensions were evaluated".to_string()
            } else {
                reasons
            }));
        }

        let overall_score = Some(round2(
            available.iter().map(|r| r.score).sum::<f64>() / available.len() as f64,
        ));
        let incomplete = available.len() < results.len();

        let primary_framework = self.five_wins(&results);
        let supplementary_frameworks = results.values().map(supplementary).collect();
        let next_action = next_action(&available);
        let narrative = narrative(
            evaluated_as_role,
            overall_score,
            &results,
            &available,
            &primary_framework,
        );

        Ok(CoachingEvaluation {
            call_id: call_id.to_string(),
            evaluated_as_role,
            rep_email: rep.map(|p| p.email.to_lowercase()),
            team_id: rep.and_then(|p| p.team_id.clone()),
            primary_framework,
            supplementary_frameworks,
            dimension_results: results,
            overall_score,
            incomplete,
            narrative,
            next_action,
            rubric_versions: BTreeMap::new(),
            evaluated_at: Utc::now(),
        })
    }

    pub fn five_wins(&self, results: &BTreeMap<Dimension, DimensionResult>) -> FiveWinsEvaluation {
        let wins: Vec<Win> = WinCategory::ALL
            .iter()
            .map(|&category| score_win(category, results))
            .collect();
        let total_score = round2(wins.iter().map(|w| w.score).sum());

        FiveWinsEvaluation {
            mapping_version: FIVE_WINS_MAPPING_VERSION.to_string(),
            wins,
            total_score,
            max_score: WIN_MAX_SCORE * WinCategory::ALL.len() as f64,
        }
    }
}

/// Weighted over the contributing dimensions that actually produced a
/// result, so one failed dimension does not zero a win it only partly feeds.
fn score_win(category: WinCategory, results: &BTreeMap<Dimension, DimensionResult>) -> Win {
    let weights = win_weights(category);
    let contributing_dimensions: Vec<Dimension> = weights.iter().map(|(d, _)| *d).collect();

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut evidence: Vec<Evidence> = Vec::new();
    let mut missing = Vec::new();

    for (dimension, weight) in weights {
        match results.get(dimension) {
            Some(result) if !result.is_failed() => {
                weighted += result.score * weight;
                total_weight += weight;
                evidence.extend(result.evidence.iter().cloned());
            }
            Some(_) => missing.push(format!("{dimension} failed")),
            None => missing.push(format!("{dimension} not evaluated")),
        }
    }
    evidence.truncate(MAX_WIN_EVIDENCE);

    if total_weight == 0.0 {
        return Win {
            category,
            name: category.name().to_string(),
            score: 0.0,
            max_score: WIN_MAX_SCORE,
            status: WinStatus::Missed,
            evidence,
            contributing_dimensions,
            error: Some(format!("no contributing dimension available ({})", missing.join(", "))),
        };
    }

    let score = round2(weighted / total_weight / DimensionResult::MAX_SCORE * WIN_MAX_SCORE);
    let ratio = score / WIN_MAX_SCORE;
    let status = if ratio >= MET_RATIO {
        WinStatus::Met
    } else if ratio >= PARTIAL_RATIO {
        WinStatus::Partial
    } else {
        WinStatus::Missed
    };

    Win {
        category,
        name: category.name().to_string(),
        score,
        max_score: WIN_MAX_SCORE,
        status,
        evidence,
        contributing_dimensions,
        error: None,
    }
}

fn supplementary(result: &DimensionResult) -> SupplementaryFramework {
    SupplementaryFramework {
        dimension: result.dimension,
        framework: supplementary_framework_name(result.dimension).to_string(),
        score: (!result.is_failed()).then_some(result.score),
        max_score: DimensionResult::MAX_SCORE,
        strengths: result.strengths.clone(),
        improvements: result.improvements.clone(),
        evidence: result.evidence.clone(),
        error: result.error.clone(),
    }
}

/// Weakest first; ties resolve in dimension order.
fn by_score_ascending<'a>(available: &[&'a DimensionResult]) -> Vec<&'a DimensionResult> {
    let mut sorted = available.to_vec();
    sorted.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.dimension.cmp(&b.dimension))
    });
    sorted
}

fn next_action(available: &[&DimensionResult]) -> Option<String> {
    by_score_ascending(available)
        .into_iter()
        .find_map(|r| r.improvements.first().cloned())
}

fn narrative(
    role: RoleVariant,
    overall_score: Option<f64>,
    results: &BTreeMap<Dimension, DimensionResult>,
    available: &[&DimensionResult],
    five_wins: &FiveWinsEvaluation,
) -> String {
    let mut parts = Vec::new();

    if let Some(score) = overall_score {
        parts.push(format!(
            "Evaluated as {} with an overall score of {score:.0}/100 across {} of {} dimensions.",
            role.as_str().to_uppercase(),
            available.len(),
            results.len()
        ));
    }

    let sorted = by_score_ascending(available);
    if let (Some(weakest), Some(strongest)) = (sorted.first(), sorted.last()) {
        if sorted.len() > 1 {
            parts.push(format!(
                "Strongest area: {} ({:.0}). Biggest opportunity: {} ({:.0}).",
                strongest.dimension.label(),
                strongest.score,
                weakest.dimension.label(),
                weakest.score
            ));
        } else {
            parts.push(format!(
                "{} scored {:.0}.",
                strongest.dimension.label(),
                strongest.score
            ));
        }
    }

    let met: Vec<&str> = five_wins
        .wins
        .iter()
        .filter(|w| w.status == WinStatus::Met)
        .map(|w| w.name.as_str())
        .collect();
    if met.is_empty() {
        parts.push("No wins fully secured yet.".to_string());
    } else {
        parts.push(format!(
            "Secured {} of {} wins: {}.",
            met.len(),
            five_wins.wins.len(),
            met.join(", ")
        ));
    }

    let failed: Vec<&str> = results
        .values()
        .filter(|r| r.is_failed())
        .map(|r| r.dimension.label())
        .collect();
    if !failed.is_empty() {
        parts.push(format!(
            "Evaluation incomplete: {} could not be analyzed.",
            failed.join(", ")
        ));
    }

    parts.join(" ")
}
