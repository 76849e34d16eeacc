use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoachError, Result};
use crate::llm::{prompts, ChunkPosition, InferenceClient, Prompt};
use crate::models::{Dimension, DimensionResult, RoleVariant, RubricVersion};
use crate::processing::Chunk;

use super::types::parse_dimension_response;

/// Everything needed to evaluate one dimension over one chunk. Cheap to
/// clone so it can move into a cache computation.
#[derive(Debug, Clone)]
pub struct AnalysisUnit {
    pub dimension: Dimension,
    pub role: RoleVariant,
    pub rubric: Arc<RubricVersion>,
    pub chunk: Arc<Chunk>,
    pub chunk_count: usize,
    pub call_duration: f64,
}

impl AnalysisUnit {
    fn prompt(&self) -> Prompt {
        prompts::dimension_analysis_prompt(
            self.dimension,
            &self.rubric,
            self.role,
            &self.chunk.segments,
            ChunkPosition {
                index: self.chunk.index,
                count: self.chunk_count,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerOutput {
    pub result: DimensionResult,
    pub raw_response: String,
}

/// Turns one (chunk, dimension) unit into a validated per-chunk result with a
/// single upstream call. Never touches the cache and never retries.
#[derive(Clone)]
pub struct DimensionAnalyzer {
    client: Arc<dyn InferenceClient>,
    upstream_timeout: Duration,
}

impl DimensionAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>, upstream_timeout: Duration) -> Self {
        Self {
            client,
            upstream_timeout,
        }
    }

    pub fn model_id(&self) -> &str {
        self.client.model_id()
    }

    pub async fn analyze(&self, unit: &AnalysisUnit) -> Result<AnalyzerOutput> {
        let prompt = unit.prompt();
        self.run(unit, &prompt).await
    }

    /// Corrective re-prompt after a schema error, quoting the bad response.
    pub async fn repair(
        &self,
        unit: &AnalysisUnit,
        raw_response: &str,
        problem: &str,
    ) -> Result<AnalyzerOutput> {
        let prompt = prompts::schema_repair_prompt(&unit.prompt(), raw_response, problem);
        self.run(unit, &prompt).await
    }

    async fn run(&self, unit: &AnalysisUnit, prompt: &Prompt) -> Result<AnalyzerOutput> {
        tracing::debug!(
            dimension = %unit.dimension,
            chunk_index = unit.chunk.index,
            rubric_version = %unit.rubric.version_id,
            "Requesting dimension analysis"
        );

        let raw_response = tokio::time::timeout(self.upstream_timeout, self.client.infer(prompt))
            .await
            .map_err(|_| {
                CoachError::UpstreamTransient(format!(
                    "inference timed out after {}s",
                    self.upstream_timeout.as_secs_f64()
                ))
            })??;

        let window = unit.chunk.start_time..unit.chunk.end_time.min(unit.call_duration);
        let result = parse_dimension_response(&raw_response, unit.dimension, window)?;
        Ok(AnalyzerOutput {
            result,
            raw_response,
        })
    }
}
