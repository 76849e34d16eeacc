mod chunker;
mod merger;

pub use chunker::{Chunk, ChunkError, TranscriptChunker};
pub use merger::{ChunkResult, EvidenceMerger};

#[cfg(test)]
pub(crate) use chunker::tests::minute_transcript;
