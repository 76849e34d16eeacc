use std::collections::HashSet;

use crate::config::AnalysisConfig;
use crate::models::{Dimension, DimensionResult, Evidence};

use super::Chunk;

/// A per-chunk outcome for one dimension, tagged with the window it covers.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub result: DimensionResult,
}

impl ChunkResult {
    pub fn new(chunk: &Chunk, result: DimensionResult) -> Self {
        Self {
            chunk_index: chunk.index,
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            result,
        }
    }

    fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// Combines per-chunk results for a dimension into one result.
///
/// Scores are weighted by chunk duration. Evidence is concatenated in chunk
/// order; an item is dropped when an earlier chunk already reported evidence
/// with the same rounded start inside the window both chunks share.
pub struct EvidenceMerger {
    granularity_secs: f64,
}

impl EvidenceMerger {
    pub fn new(granularity_secs: f64) -> Self {
        let granularity_secs = if granularity_secs.is_finite() && granularity_secs > 0.0 {
            granularity_secs
        } else {
            1.0
        };
        Self { granularity_secs }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.evidence_dedup_granularity_secs)
    }

    pub fn merge(&self, dimension: Dimension, mut results: Vec<ChunkResult>) -> DimensionResult {
        results.sort_by_key(|r| r.chunk_index);

        let mut warnings = Vec::new();
        let mut retry_count = 0;
        let mut succeeded = Vec::with_capacity(results.len());

        for chunk_result in results {
            retry_count += chunk_result.result.retry_count;
            warnings.extend(chunk_result.result.warnings.iter().cloned());
            match &chunk_result.result.error {
                Some(error) => {
                    warnings.push(format!("chunk {} failed: {}", chunk_result.chunk_index, error))
                }
                None => succeeded.push(chunk_result),
            }
        }

        if succeeded.is_empty() {
            let reason = warnings
                .last()
                .cloned()
                .unwrap_or_else(|| "no chunk results".to_string());
            let mut failed = DimensionResult::failed(dimension, reason);
            failed.retry_count = retry_count;
            failed.warnings = warnings;
            return failed;
        }

        let overlaps = Self::overlap_windows(&succeeded);

        DimensionResult {
            dimension,
            score: Self::weighted_score(&succeeded),
            evidence: self.merge_evidence(dimension, &succeeded, &overlaps),
            strengths: dedupe_text(succeeded.iter().flat_map(|r| r.result.strengths.iter())),
            improvements: dedupe_text(succeeded.iter().flat_map(|r| r.result.improvements.iter())),
            error: None,
            retry_count,
            warnings,
        }
    }

    /// Time ranges shared by consecutive windows.
    fn overlap_windows(results: &[ChunkResult]) -> Vec<(f64, f64)> {
        results
            .windows(2)
            .filter(|pair| pair[1].chunk_index == pair[0].chunk_index + 1)
            .filter_map(|pair| {
                let start = pair[1].start_time;
                let end = pair[0].end_time;
                (start < end).then_some((start, end))
            })
            .collect()
    }

    fn weighted_score(results: &[ChunkResult]) -> f64 {
        let total_duration: f64 = results.iter().map(ChunkResult::duration).sum();

        let score = if total_duration > 0.0 {
            results
                .iter()
                .map(|r| r.result.score * r.duration())
                .sum::<f64>()
                / total_duration
        } else {
            results.iter().map(|r| r.result.score).sum::<f64>() / results.len() as f64
        };

        (score.clamp(0.0, DimensionResult::MAX_SCORE) * 100.0).round() / 100.0
    }

    fn merge_evidence(
        &self,
        dimension: Dimension,
        results: &[ChunkResult],
        overlaps: &[(f64, f64)],
    ) -> Vec<Evidence> {
        let mut seen_in_overlap: HashSet<(Dimension, i64, usize)> = HashSet::new();
        let mut merged = Vec::new();

        for chunk_result in results {
            for evidence in &chunk_result.result.evidence {
                let window = overlaps.iter().position(|&(start, end)| {
                    evidence.timestamp_start >= start && evidence.timestamp_start <= end
                });

                if let Some(window) = window {
                    let key = (dimension, self.bucket(evidence.timestamp_start), window);
                    if !seen_in_overlap.insert(key) {
                        continue;
                    }
                }

                merged.push(evidence.clone());
            }
        }

        merged.sort_by(|a, b| a.timestamp_start.total_cmp(&b.timestamp_start));
        merged
    }

    fn bucket(&self, timestamp: f64) -> i64 {
        (timestamp / self.granularity_secs).round() as i64
    }
}

impl Default for EvidenceMerger {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

fn dedupe_text<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| !item.trim().is_empty())
        .filter(|item| seen.insert(item.trim().to_lowercase()))
        .cloned()
        .collect()
}
