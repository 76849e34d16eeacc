use std::sync::Arc;

use thiserror::Error;

use crate::processing::ChunkError;

#[derive(Error, Debug)]
pub enum CoachError {
    #[error("Database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("Upstream rate limit exceeded, retry after {retry_after:?} seconds")]
    UpstreamRateLimit { retry_after: Option<u64> },

    #[error("Upstream permanent error: {0}")]
    UpstreamPermanent(String),

    /// The inference response did not match the dimension schema. `raw` keeps
    /// the offending text so a repair prompt can quote it back.
    #[error("Response schema error: {message}")]
    Schema { message: String, raw: String },

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Cache store error: {0}")]
    CacheStore(String),

    #[error("Timeout exceeded: {0}")]
    Timeout(String),

    #[error("{source} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CoachError>,
    },

    #[error("All dimensions failed: {0}")]
    AllDimensionsFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by the retry policy and by the cache when it
/// decides whether a failure may be remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Validation,
    Transient,
    Permanent,
    Schema,
    CacheStore,
    Timeout,
    Internal,
}

impl CoachError {
    pub fn class(&self) -> FailureClass {
        match self {
            CoachError::Validation(_) | CoachError::Chunk(_) | CoachError::NotFound(_) => {
                FailureClass::Validation
            }
            CoachError::UpstreamTransient(_) | CoachError::UpstreamRateLimit { .. } => {
                FailureClass::Transient
            }
            CoachError::Http(e) => {
                if e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
                {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            CoachError::UpstreamPermanent(_)
            | CoachError::LlmUnavailable(_)
            | CoachError::AllDimensionsFailed(_) => FailureClass::Permanent,
            CoachError::Schema { .. } => FailureClass::Schema,
            CoachError::CacheStore(_) | CoachError::Database(_) => FailureClass::CacheStore,
            CoachError::Timeout(_) => FailureClass::Timeout,
            CoachError::Json(_) | CoachError::Io(_) | CoachError::Internal(_) => {
                FailureClass::Internal
            }
            CoachError::RetriesExhausted { source, .. } => source.class(),
        }
    }

    /// Upstream attempts spent before this error was returned.
    pub fn attempts(&self) -> u32 {
        match self {
            CoachError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Errors that are properties of the request itself and therefore
    /// reported to the caller instead of being folded into a dimension.
    pub fn is_validation(&self) -> bool {
        self.class() == FailureClass::Validation
    }
}

/// Outcome shared between all waiters of a single-flight computation.
pub type SharedError = Arc<CoachError>;

pub type Result<T> = std::result::Result<T, CoachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        let err = CoachError::UpstreamRateLimit { retry_after: Some(2) };
        assert_eq!(err.class(), FailureClass::Transient);
        assert!(err.is_transient());
    }

    #[test]
    fn test_schema_error_keeps_raw_response() {
        let err = CoachError::Schema {
            message: "missing field `score`".to_string(),
            raw: "{\"evidence\": []}".to_string(),
        };
        assert_eq!(err.class(), FailureClass::Schema);
        assert_eq!(err.to_string(), "Response schema error: missing field `score`");
    }

    #[test]
    fn test_validation_classification() {
        assert!(CoachError::Validation("bad call id".into()).is_validation());
        assert!(CoachError::NotFound("call".into()).is_validation());
        assert!(!CoachError::UpstreamPermanent("policy".into()).is_validation());
    }

    #[test]
    fn test_database_errors_degrade_as_cache_store() {
        let err = CoachError::CacheStore("connection refused".into());
        assert_eq!(err.class(), FailureClass::CacheStore);
    }
}
