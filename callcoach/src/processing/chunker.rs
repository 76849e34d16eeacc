use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::models::{Segment, Transcript};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("segment {index} needs ~{tokens} tokens, above the {max_tokens} token budget")]
    SegmentTooLarge {
        index: usize,
        tokens: usize,
        max_tokens: usize,
    },
}

/// A window of consecutive transcript segments. `end_index` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub segments: Vec<Segment>,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub estimated_tokens: usize,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// Splits a transcript into overlapping windows bounded by a token budget.
pub struct TranscriptChunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl TranscriptChunker {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            overlap_tokens,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.chunk_max_tokens, config.chunk_overlap_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    pub fn chunk(&self, transcript: &Transcript) -> Result<Vec<Chunk>, ChunkError> {
        let segments = &transcript.segments;
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let tokens: Vec<usize> = segments.iter().map(Self::estimate_tokens).collect();

        if let Some((index, &too_big)) = tokens
            .iter()
            .enumerate()
            .find(|(_, &t)| t > self.max_tokens)
        {
            return Err(ChunkError::SegmentTooLarge {
                index,
                tokens: too_big,
                max_tokens: self.max_tokens,
            });
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let mut end = start;
            let mut used = 0;
            while end < segments.len() && used + tokens[end] <= self.max_tokens {
                used += tokens[end];
                end += 1;
            }

            chunks.push(Self::build_chunk(chunks.len(), segments, start, end, used));

            if end == segments.len() {
                break;
            }

            start = self.next_window_start(&tokens, start, end);
        }

        Ok(chunks)
    }

    /// Walk back from the end of the finished window collecting up to
    /// `overlap_tokens` worth of segments. The tail never covers the whole
    /// window, and is trimmed until the next unseen segment still fits.
    fn next_window_start(&self, tokens: &[usize], start: usize, end: usize) -> usize {
        let mut next = end;
        let mut overlap = 0;

        while next > start + 1 && overlap + tokens[next - 1] <= self.overlap_tokens {
            overlap += tokens[next - 1];
            next -= 1;
        }

        while next < end && overlap + tokens[end] > self.max_tokens {
            overlap -= tokens[next];
            next += 1;
        }

        next
    }

    fn build_chunk(
        index: usize,
        segments: &[Segment],
        start: usize,
        end: usize,
        estimated_tokens: usize,
    ) -> Chunk {
        let window = &segments[start..end];
        Chunk {
            index,
            segments: window.to_vec(),
            start_index: start,
            end_index: end,
            start_time: window.first().map(|s| s.start_time).unwrap_or(0.0),
            end_time: window.iter().map(|s| s.end_time).fold(0.0_f64, f64::max),
            estimated_tokens,
        }
    }

    /// Rough token estimate for one rendered transcript line
    /// (`speaker: text`), at ~4 bytes per token.
    pub fn estimate_tokens(segment: &Segment) -> usize {
        let rendered_len = segment.speaker.len() + 2 + segment.text.len();
        rendered_len.div_ceil(4)
    }
}

impl Default for TranscriptChunker {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}
