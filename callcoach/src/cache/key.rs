use sha2::{Digest, Sha256};

use crate::config::AnalysisConfig;
use crate::models::{Dimension, RoleVariant, Transcript};

/// Bumped whenever the layout of a cached `DimensionResult` or of the key
/// itself changes.
pub const CACHE_KEY_SCHEMA: &str = "callcoach.analysis.v1";

const FIELD_SEPARATOR: &[u8] = b"\x1f";

fn update_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field);
    hasher.update(FIELD_SEPARATOR);
}

/// Derives cache keys from content only. Nothing time- or process-dependent
/// goes into the hash.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    namespace: String,
}

impl CacheKeyGenerator {
    /// `model` and the chunking budget scope the key: a chunk index only
    /// means the same window under the same budget, and a different model
    /// gives different answers.
    pub fn new(model: &str, max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            namespace: format!("{CACHE_KEY_SCHEMA}|{model}|{max_tokens}|{overlap_tokens}"),
        }
    }

    pub fn from_config(model: &str, config: &AnalysisConfig) -> Self {
        Self::new(model, config.chunk_max_tokens, config.chunk_overlap_tokens)
    }

    pub fn key(
        &self,
        transcript_hash: &str,
        dimension: Dimension,
        rubric_version: &str,
        role: RoleVariant,
        chunk_index: usize,
    ) -> String {
        let mut h = Sha256::new();
        update_field(&mut h, self.namespace.as_bytes());
        update_field(&mut h, transcript_hash.as_bytes());
        update_field(&mut h, dimension.as_str().as_bytes());
        update_field(&mut h, rubric_version.as_bytes());
        update_field(&mut h, role.as_str().as_bytes());
        update_field(&mut h, &(chunk_index as u64).to_le_bytes());
        format!("{:x}", h.finalize())
    }
}

/// Content hash of a transcript's segments. The call id is left out so the
/// same recording imported twice shares cache entries.
pub fn transcript_hash(transcript: &Transcript) -> String {
    let mut h = Sha256::new();
    for segment in &transcript.segments {
        update_field(&mut h, segment.speaker.as_bytes());
        update_field(&mut h, &segment.start_time.to_bits().to_le_bytes());
        update_field(&mut h, &segment.end_time.to_bits().to_le_bytes());
        update_field(&mut h, segment.text.as_bytes());
    }
    format!("{:x}", h.finalize())
}
