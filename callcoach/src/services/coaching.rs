use std::collections::BTreeMap;
use std::sync::Arc;

use nanoid::nanoid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::cache::{transcript_hash, AnalysisCache};
use crate::config::Config;
use crate::db::{CacheBackend, DatabaseBackend, RubricStore, SessionStore, TranscriptStore};
use crate::error::{CoachError, FailureClass, Result};
use crate::intelligence::{DimensionAnalyzer, ResultAggregator, RoleSelector};
use crate::llm::InferenceClient;
use crate::models::{
    AnalyzeOptions, CallMetadata, CoachingEvaluation, Dimension, DimensionResult,
    ImportCallRequest, PublishRubricRequest, RoleVariant, RubricVersion,
};
use crate::processing::TranscriptChunker;

use super::orchestrator::{ConcurrentOrchestrator, EvaluationRequest};

const MAX_CALL_ID_LEN: usize = 128;
const MAX_ACTIVATION_ATTEMPTS: usize = 8;

/// Failures that will not change on retry are remembered briefly.
fn is_terminal_failure(error: &CoachError) -> bool {
    matches!(
        error.class(),
        FailureClass::Permanent | FailureClass::Validation
    )
}

/// Entry point for analyzing calls, importing transcripts and publishing
/// rubrics.
pub struct CoachingService {
    transcripts: Arc<dyn TranscriptStore>,
    rubrics: Arc<dyn RubricStore>,
    sessions: Arc<dyn SessionStore>,
    cache_store: Arc<dyn CacheBackend>,
    chunker: TranscriptChunker,
    roles: RoleSelector,
    orchestrator: ConcurrentOrchestrator,
    aggregator: ResultAggregator,
}

impl CoachingService {
    pub fn new<B: DatabaseBackend + 'static>(
        db: Arc<B>,
        client: Arc<dyn InferenceClient>,
        config: &Config,
    ) -> Self {
        let cache_store: Arc<dyn CacheBackend> = db.clone();
        let cache = AnalysisCache::new(cache_store.clone(), &config.cache)
            .with_terminal_failures(is_terminal_failure);
        let analyzer = DimensionAnalyzer::new(client, config.analysis.upstream_timeout());

        Self {
            transcripts: db.clone(),
            rubrics: db.clone(),
            sessions: db,
            cache_store,
            chunker: TranscriptChunker::from_config(&config.analysis),
            roles: RoleSelector::from_config(&config.analysis),
            orchestrator: ConcurrentOrchestrator::from_config(analyzer, cache, &config.analysis),
            aggregator: ResultAggregator::new(),
        }
    }

    pub async fn analyze_call(
        &self,
        call_id: &str,
        options: AnalyzeOptions,
    ) -> Result<CoachingEvaluation> {
        self.analyze_call_with_cancel(call_id, options, &CancellationToken::new())
            .await
    }

    /// Analyze a stored call. Dimensions still pending when `cancel` fires
    /// or the call deadline passes are reported as failed.
    pub async fn analyze_call_with_cancel(
        &self,
        call_id: &str,
        options: AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Result<CoachingEvaluation> {
        validate_call_id(call_id)?;
        let dimensions = requested_dimensions(options.dimensions.as_deref())?;
        let run_id = nanoid!(10);

        let transcript = self
            .transcripts
            .get_transcript(call_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("call {call_id}")))?;
        if transcript.is_empty() {
            return Err(CoachError::Validation(format!(
                "call {call_id} has an empty transcript"
            )));
        }

        let metadata = match self.transcripts.get_call_metadata(call_id).await? {
            Some(metadata) => metadata,
            None => {
                warn!(call_id, "Call has no participant metadata");
                CallMetadata {
                    call_id: call_id.to_string(),
                    duration: transcript.total_duration,
                    participants: Vec::new(),
                    evaluated_role: None,
                    recorded_at: None,
                }
            }
        };

        let decision = self
            .roles
            .select_role(
                &metadata,
                &transcript.segments,
                options.role_override,
                self.sessions.as_ref(),
            )
            .await?;
        let role = decision.role;
        info!(call_id, run_id = %run_id, role = %role, source = ?decision.source, "Role selected");

        if metadata.evaluated_role != Some(role) {
            self.transcripts.set_evaluated_role(call_id, role).await?;
        }

        let mut rubrics = BTreeMap::new();
        for &dimension in &dimensions {
            if let Some(rubric) = self.rubrics.get_rubric(dimension, role, None).await? {
                rubrics.insert(dimension, rubric);
            }
        }
        let rubric_versions: BTreeMap<Dimension, String> = rubrics
            .iter()
            .map(|(dimension, rubric)| (*dimension, rubric.version_id.clone()))
            .collect();

        if !options.force_reanalysis {
            if let Some(stored) = self.sessions.get_evaluation(call_id).await? {
                if is_reusable(&stored, role, &dimensions, &rubric_versions) {
                    info!(call_id, run_id = %run_id, "Reusing stored evaluation");
                    return Ok(stored);
                }
                debug!(call_id, "Stored evaluation is stale, re-analyzing");
            }
        }

        let chunks = self.chunker.chunk(&transcript)?;
        debug!(call_id, chunks = chunks.len(), "Transcript chunked");

        let request = EvaluationRequest {
            call_id: call_id.to_string(),
            transcript_hash: transcript_hash(&transcript),
            role,
            chunks,
            call_duration: transcript.total_duration,
            dimensions,
            rubrics,
            force_refresh: options.force_reanalysis,
        };
        let run = self.orchestrator.evaluate(request, cancel).await;
        if run.stats.timed_out && run.results.values().all(DimensionResult::is_failed) {
            warn!(call_id, run_id = %run_id, "Deadline reached before any dimension completed");
            return Err(CoachError::Timeout(format!(
                "no dimension of call {call_id} completed before the deadline"
            )));
        }

        let mut evaluation = self.aggregator.aggregate(
            call_id,
            run.results,
            role,
            decision.primary_speaker.as_ref(),
        )?;
        evaluation.rubric_versions = rubric_versions;
        self.sessions.save_evaluation(call_id, &evaluation).await?;

        info!(
            call_id,
            run_id = %run_id,
            role = %role,
            overall_score = ?evaluation.overall_score,
            incomplete = evaluation.incomplete,
            cache_hits = run.stats.cache_hits,
            computed = run.stats.computed,
            failed_units = run.stats.failed_units,
            timed_out = run.stats.timed_out,
            "Call analyzed"
        );

        Ok(evaluation)
    }

    pub async fn get_evaluation(&self, call_id: &str) -> Result<Option<CoachingEvaluation>> {
        validate_call_id(call_id)?;
        self.sessions.get_evaluation(call_id).await
    }

    pub async fn import_call(&self, request: ImportCallRequest) -> Result<CallMetadata> {
        request
            .validate()
            .map_err(|e| CoachError::Validation(e.to_string()))?;
        validate_call_id(&request.call_id)?;

        if let Some(index) = request.segments.iter().position(|s| {
            !s.start_time.is_finite()
                || !s.end_time.is_finite()
                || s.start_time < 0.0
                || s.end_time < s.start_time
        }) {
            return Err(CoachError::Validation(format!(
                "segment {index} has invalid timestamps"
            )));
        }

        let (transcript, metadata) = request.into_parts();
        self.transcripts.save_call(&transcript, &metadata).await?;

        info!(
            call_id = %metadata.call_id,
            segments = transcript.segments.len(),
            participants = metadata.participants.len(),
            "Call imported"
        );
        Ok(metadata)
    }

    /// Store a new rubric version, make it the active one and drop cached
    /// analyses scored against the versions it replaces.
    pub async fn publish_rubric(&self, request: PublishRubricRequest) -> Result<RubricVersion> {
        request
            .validate()
            .map_err(|e| CoachError::Validation(e.to_string()))?;
        if !request.role_variant.is_assigned() {
            return Err(CoachError::Validation(
                "rubrics must target an assigned role".to_string(),
            ));
        }

        let rubric = request.into_rubric();
        let (dimension, role) = (rubric.dimension, rubric.role_variant);

        if !self.rubrics.publish_rubric(&rubric).await? {
            return Err(CoachError::Validation(format!(
                "rubric {dimension}/{role} version {} is already published",
                rubric.version_id
            )));
        }

        self.activate(dimension, role, &rubric.version_id).await?;
        let invalidated = self
            .orchestrator
            .cache()
            .invalidate_superseded(dimension, role, &rubric.version_id)
            .await?;

        info!(
            dimension = %dimension,
            role = %role,
            version = %rubric.version_id,
            invalidated,
            "Rubric published"
        );
        Ok(rubric)
    }

    async fn activate(&self, dimension: Dimension, role: RoleVariant, version: &str) -> Result<()> {
        for _ in 0..MAX_ACTIVATION_ATTEMPTS {
            let current = self
                .cache_store
                .active_rubric_version(dimension, role)
                .await?;
            if current.as_deref() == Some(version) {
                return Ok(());
            }
            if self
                .cache_store
                .compare_and_set_active_version(dimension, role, current.as_deref(), version)
                .await?
            {
                return Ok(());
            }
            debug!(dimension = %dimension, role = %role, "Active rubric moved concurrently, retrying");
        }

        Err(CoachError::Internal(format!(
            "could not activate rubric {dimension}/{role} version {version}"
        )))
    }

}

fn validate_call_id(call_id: &str) -> Result<()> {
    let valid = !call_id.is_empty()
        && call_id.len() <= MAX_CALL_ID_LEN
        && call_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));

    if valid {
        Ok(())
    } else {
        Err(CoachError::Validation(format!("invalid call id: {call_id:?}")))
    }
}

/// `None` selects every dimension. Names are deduplicated and returned in
/// dimension order.
fn requested_dimensions(names: Option<&[String]>) -> Result<Vec<Dimension>> {
    let Some(names) = names else {
        return Ok(Dimension::ALL.to_vec());
    };
    if names.is_empty() {
        return Err(CoachError::Validation(
            "at least one dimension must be requested".to_string(),
        ));
    }

    let mut dimensions = names
        .iter()
        .map(|name| name.parse::<Dimension>().map_err(CoachError::Validation))
        .collect::<Result<Vec<_>>>()?;
    dimensions.sort();
    dimensions.dedup();
    Ok(dimensions)
}

fn is_reusable(
    stored: &CoachingEvaluation,
    role: RoleVariant,
    dimensions: &[Dimension],
    rubric_versions: &BTreeMap<Dimension, String>,
) -> bool {
    !stored.incomplete
        && stored.evaluated_as_role == role
        && stored.dimensions() == dimensions
        && &stored.rubric_versions == rubric_versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_validation() {
        assert!(validate_call_id("call_2024-05-01.h1").is_ok());
        assert!(validate_call_id("").is_err());
        assert!(validate_call_id("call 1").is_err());
        assert!(validate_call_id("../etc/passwd").is_err());
        assert!(validate_call_id(&"c".repeat(MAX_CALL_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_requested_dimensions() {
        assert_eq!(requested_dimensions(None).unwrap(), Dimension::ALL.to_vec());

        let names = vec![
            "engagement".to_string(),
            "Discovery".to_string(),
            "engagement".to_string(),
        ];
        assert_eq!(
            requested_dimensions(Some(names.as_slice())).unwrap(),
            vec![Dimension::Discovery, Dimension::Engagement]
        );

        let err = requested_dimensions(Some(&["charisma".to_string()][..])).unwrap_err();
        assert!(err.is_validation());
        assert!(requested_dimensions(Some(&[][..])).unwrap_err().is_validation());
    }

    #[test]
    fn test_terminal_failures() {
        assert!(is_terminal_failure(&CoachError::UpstreamPermanent(
            "401".to_string()
        )));
        assert!(!is_terminal_failure(&CoachError::UpstreamTransient(
            "503".to_string()
        )));
        assert!(!is_terminal_failure(&CoachError::Schema {
            message: "bad".to_string(),
            raw: String::new(),
        }));
    }
}
