//! Failure taxonomy for the pipeline stages.
//!
//! Stage-local errors (`SourceError`, `AnnotationError`) are absorbed and counted by the
//! orchestrator. `StoreError` is fatal for a run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::market::Market;

/// A news source could not deliver a batch (the SourceUnavailable condition).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{provider}: source unreachable: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },
    #[error("{provider}: no response within {after:?}")]
    Timeout {
        provider: &'static str,
        after: Duration,
    },
    #[error("{provider}: HTTP status {status}")]
    Status { provider: &'static str, status: u16 },
    #[error("{provider}: invalid response: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },
    #[error("{provider}: invalid request for {market}: {reason}")]
    InvalidRequest {
        provider: &'static str,
        market: Market,
        reason: String,
    },
}

/// Annotation of a single article failed; the article is kept unannotated.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no completion within {0:?}")]
    Timeout(Duration),
    #[error("LLM service returned HTTP {0}")]
    Status(u16),
    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("annotator disabled")]
    Disabled,
}

impl AnnotationError {
    /// Network failures, timeouts, rate limiting and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnnotationError::Transport(_) | AnnotationError::Timeout(_) => true,
            AnnotationError::Status(code) => *code == 429 || (500..600).contains(code),
            AnnotationError::MalformedResponse(_)
            | AnnotationError::InvalidField { .. }
            | AnnotationError::Disabled => false,
        }
    }
}

/// The dataset could not be written or read.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no dataset found in {0}")]
    NotFound(PathBuf),
}

/// Run-level failure, recorded on the run report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no articles fetched from any market")]
    NoArticlesFetched,
    #[error("failed to persist dataset: {0}")]
    Persist(#[from] StoreError),
    #[error("run aborted during {0}")]
    Aborted(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AnnotationError::Transport("reset".into()).is_retryable());
        assert!(AnnotationError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(AnnotationError::Status(429).is_retryable());
        assert!(AnnotationError::Status(503).is_retryable());
        assert!(!AnnotationError::Status(401).is_retryable());
        assert!(!AnnotationError::MalformedResponse("x".into()).is_retryable());
        assert!(!AnnotationError::Disabled.is_retryable());
    }
}
