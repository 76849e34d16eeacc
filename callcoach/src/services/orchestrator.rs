use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{AnalysisCache, CacheKeyGenerator, CacheOutcome, CachePolicy, CacheScope};
use crate::config::AnalysisConfig;
use crate::error::{CoachError, Result};
use crate::intelligence::{AnalysisUnit, DimensionAnalyzer};
use crate::models::{Dimension, DimensionResult, RoleVariant, RubricVersion};
use crate::processing::{Chunk, ChunkResult, EvidenceMerger};

use super::retry::RetryPolicy;

/// One call's worth of work: every requested dimension over every chunk.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub call_id: String,
    pub transcript_hash: String,
    pub role: RoleVariant,
    pub chunks: Vec<Chunk>,
    pub call_duration: f64,
    pub dimensions: Vec<Dimension>,
    /// Active rubric per dimension; a requested dimension without one fails.
    pub rubrics: BTreeMap<Dimension, RubricVersion>,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub units: usize,
    pub cache_hits: usize,
    pub computed: usize,
    pub failed_units: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub results: BTreeMap<Dimension, DimensionResult>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Deadline,
    Cancelled,
}

/// Fans a call out into (chunk, dimension) units, runs each through the
/// analysis cache with bounded upstream concurrency, and merges the chunk
/// results per dimension.
pub struct ConcurrentOrchestrator {
    analyzer: DimensionAnalyzer,
    cache: AnalysisCache,
    keys: CacheKeyGenerator,
    merger: EvidenceMerger,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    deadline: Duration,
}

impl ConcurrentOrchestrator {
    pub fn new(
        analyzer: DimensionAnalyzer,
        cache: AnalysisCache,
        keys: CacheKeyGenerator,
        merger: EvidenceMerger,
        retry: RetryPolicy,
        max_concurrency: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            analyzer,
            cache,
            keys,
            merger,
            retry,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            deadline,
        }
    }

    pub fn from_config(
        analyzer: DimensionAnalyzer,
        cache: AnalysisCache,
        config: &AnalysisConfig,
    ) -> Self {
        let keys = CacheKeyGenerator::from_config(analyzer.model_id(), config);
        Self::new(
            analyzer,
            cache,
            keys,
            EvidenceMerger::from_config(config),
            RetryPolicy::from_config(config),
            config.max_concurrency,
            config.call_deadline(),
        )
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
        cancel: &CancellationToken,
    ) -> EvaluationRun {
        let EvaluationRequest {
            call_id,
            transcript_hash,
            role,
            chunks,
            call_duration,
            dimensions,
            rubrics,
            force_refresh,
        } = request;

        let chunks: Vec<Arc<Chunk>> = chunks.into_iter().map(Arc::new).collect();
        let policy = CachePolicy { force_refresh };
        let mut stats = RunStats::default();
        let mut results: BTreeMap<Dimension, DimensionResult> = BTreeMap::new();
        let mut scheduled: BTreeMap<Dimension, usize> = BTreeMap::new();
        let mut pending = FuturesUnordered::new();

        for dimension in dimensions {
            if results.contains_key(&dimension) || scheduled.contains_key(&dimension) {
                continue;
            }
            let Some(rubric) = rubrics.get(&dimension) else {
                warn!(call_id = %call_id, dimension = %dimension, role = %role, "No published rubric");
                results.insert(
                    dimension,
                    DimensionResult::failed(
                        dimension,
                        format!("no published rubric for {dimension} ({role})"),
                    ),
                );
                continue;
            };
            if chunks.is_empty() {
                results.insert(
                    dimension,
                    DimensionResult::failed(dimension, "transcript has no content to analyze"),
                );
                continue;
            }

            let rubric = Arc::new(rubric.clone());
            scheduled.insert(dimension, chunks.len());
            for chunk in &chunks {
                let key = self.keys.key(
                    &transcript_hash,
                    dimension,
                    &rubric.version_id,
                    role,
                    chunk.index,
                );
                let unit = AnalysisUnit {
                    dimension,
                    role,
                    rubric: Arc::clone(&rubric),
                    chunk: Arc::clone(chunk),
                    chunk_count: chunks.len(),
                    call_duration,
                };
                pending.push(self.run_unit(key, unit, policy));
            }
        }
        stats.units = pending.len();

        let mut completed: BTreeMap<Dimension, Vec<ChunkResult>> = BTreeMap::new();
        let mut interruption = None;
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interruption = Some(Interruption::Cancelled);
                    break;
                }
                _ = &mut deadline => {
                    interruption = Some(Interruption::Deadline);
                    break;
                }
                next = pending.next() => {
                    let Some((unit, outcome)) = next else {
                        break;
                    };
                    let chunk_result = self.record(&call_id, &unit, outcome, &mut stats);
                    completed.entry(unit.dimension).or_default().push(chunk_result);
                }
            }
        }

        // Dropping the remaining waiters tears down flights nobody else awaits.
        let abandoned = pending.len();
        drop(pending);

        for (dimension, expected) in scheduled {
            let done = completed.remove(&dimension).unwrap_or_default();
            let result = match interruption {
                Some(reason) if done.len() < expected => {
                    let mut failed = DimensionResult::failed(
                        dimension,
                        format!(
                            "{} ({} of {expected} chunks completed)",
                            self.interruption_reason(reason),
                            done.len()
                        ),
                    );
                    failed.retry_count = done.iter().map(|r| r.result.retry_count).sum();
                    failed
                }
                _ => self.merger.merge(dimension, done),
            };
            if let Some(error) = &result.error {
                warn!(call_id = %call_id, dimension = %dimension, error = %error, "Dimension failed");
            }
            results.insert(dimension, result);
        }

        match interruption {
            Some(Interruption::Deadline) => {
                stats.timed_out = true;
                warn!(call_id = %call_id, abandoned, deadline_secs = self.deadline.as_secs(), "Evaluation deadline reached");
            }
            Some(Interruption::Cancelled) => {
                stats.cancelled = true;
                warn!(call_id = %call_id, abandoned, "Evaluation cancelled");
            }
            None => {}
        }

        info!(
            call_id = %call_id,
            units = stats.units,
            cache_hits = stats.cache_hits,
            computed = stats.computed,
            failed_units = stats.failed_units,
            timed_out = stats.timed_out,
            "Evaluation run finished"
        );

        EvaluationRun { results, stats }
    }

    fn interruption_reason(&self, reason: Interruption) -> String {
        match reason {
            Interruption::Deadline => {
                format!("timed out after {}s", self.deadline.as_secs_f64())
            }
            Interruption::Cancelled => "evaluation cancelled".to_string(),
        }
    }

    async fn run_unit(
        &self,
        key: String,
        unit: AnalysisUnit,
        policy: CachePolicy,
    ) -> (AnalysisUnit, CacheOutcome) {
        let scope = CacheScope {
            dimension: unit.dimension,
            role: unit.role,
            rubric_version: unit.rubric.version_id.clone(),
        };
        let analyzer = self.analyzer.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let retry = self.retry;
        let compute_unit = unit.clone();

        let outcome = self
            .cache
            .get_or_compute(&key, &scope, policy, move || {
                analyze_with_retry(analyzer, semaphore, retry, compute_unit)
            })
            .await;
        (unit, outcome)
    }

    fn record(
        &self,
        call_id: &str,
        unit: &AnalysisUnit,
        outcome: CacheOutcome,
        stats: &mut RunStats,
    ) -> ChunkResult {
        match outcome {
            Ok(lookup) => {
                let mut value = lookup.value;
                if lookup.cache_hit {
                    stats.cache_hits += 1;
                    value.retry_count = 0;
                } else {
                    stats.computed += 1;
                }
                ChunkResult::new(&unit.chunk, value)
            }
            Err(error) => {
                stats.failed_units += 1;
                warn!(
                    call_id,
                    dimension = %unit.dimension,
                    chunk_index = unit.chunk.index,
                    error = %error,
                    "Chunk analysis failed"
                );
                let mut failed = DimensionResult::failed(unit.dimension, error.to_string());
                failed.retry_count = error.attempts().saturating_sub(1);
                ChunkResult::new(&unit.chunk, failed)
            }
        }
    }
}

/// Upstream calls for one unit: transient failures back off and retry, a
/// schema failure gets exactly one corrective re-prompt. The pool permit is
/// held only while a request is on the wire.
async fn analyze_with_retry(
    analyzer: DimensionAnalyzer,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    unit: AnalysisUnit,
) -> Result<DimensionResult> {
    let mut attempt: u32 = 0;
    let mut repair: Option<(String, String)> = None;

    loop {
        attempt += 1;
        let outcome = {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| CoachError::Internal("inference pool closed".to_string()))?;
            match &repair {
                Some((raw, problem)) => analyzer.repair(&unit, raw, problem).await,
                None => analyzer.analyze(&unit).await,
            }
        };

        let error = match outcome {
            Ok(output) => {
                let mut result = output.result;
                result.retry_count = attempt - 1;
                debug!(
                    dimension = %unit.dimension,
                    chunk_index = unit.chunk.index,
                    attempt,
                    score = result.score,
                    "Chunk analyzed"
                );
                return Ok(result);
            }
            Err(error) => error,
        };

        if let CoachError::Schema { message, raw } = &error {
            if repair.is_some() {
                return Err(CoachError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(CoachError::UpstreamPermanent(format!(
                        "schema repair failed: {message}"
                    ))),
                });
            }
            if attempt < retry.max_attempts.max(2) {
                warn!(
                    dimension = %unit.dimension,
                    chunk_index = unit.chunk.index,
                    attempt,
                    error = %message,
                    "Response failed schema validation, requesting repair"
                );
                repair = Some((raw.clone(), message.clone()));
                continue;
            }
        }

        match retry.next_delay(&error, attempt) {
            Some(delay) => {
                warn!(
                    dimension = %unit.dimension,
                    chunk_index = unit.chunk.index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Upstream call failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            None if attempt > 1 => {
                return Err(CoachError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                })
            }
            None => return Err(error),
        }
    }
}
