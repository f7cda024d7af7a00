//! Error taxonomy for the deployment pipeline.
//!
//! Two families:
//! - boundary errors (`Validation`, `Conflict`, `NotFound`) are reported
//!   synchronously at submission time and never re-enter the queue;
//! - attempt errors (`Fetch`, `Compile`, `Deploy`) are written to the
//!   artifact record, re-raised to the dispatcher, and retried with backoff
//!   up to the attempt cap.
//!
//! `Infrastructure` covers the store itself being unavailable; it is not
//! attributed to the artifact.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad or missing input (never retried)
    #[error("validation error: {0}")]
    Validation(String),

    /// Artifact already in flight or already deployed (never retried)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown artifact or job (never retried)
    #[error("not found: {0}")]
    NotFound(String),

    /// Source retrieval failed (retry eligible)
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Compiler reported errors or produced no deployable entry (retry eligible)
    #[error("compile error: {0}")]
    Compile(String),

    /// Broadcast, signing, or inclusion failure (retry eligible)
    #[error("deploy error: {0}")]
    Deploy(String),

    /// Registry or queue unavailable; not attributed to the artifact
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl PipelineError {
    /// Whether the dispatcher may requeue the job with backoff.
    ///
    /// Validation-class mistakes inside an attempt terminate the job
    /// immediately instead of burning retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(_)
                | PipelineError::Compile(_)
                | PipelineError::Deploy(_)
                | PipelineError::Infrastructure(_)
        )
    }

    /// Whether this failure belongs on the artifact record. Infrastructure
    /// errors do not: the registry being down is not an artifact failure.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(_) | PipelineError::Compile(_) | PipelineError::Deploy(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Conflict(_) => "conflict",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Compile(_) => "compile",
            PipelineError::Deploy(_) => "deploy",
            PipelineError::Infrastructure(_) => "infrastructure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_errors_are_retryable() {
        assert!(PipelineError::Fetch("timeout".into()).is_retryable());
        assert!(PipelineError::Compile("bad pragma".into()).is_retryable());
        assert!(PipelineError::Deploy("rejected".into()).is_retryable());
        assert!(PipelineError::Infrastructure("db gone".into()).is_retryable());
    }

    #[test]
    fn boundary_errors_are_not_retryable() {
        assert!(!PipelineError::Validation("missing id".into()).is_retryable());
        assert!(!PipelineError::Conflict("in flight".into()).is_retryable());
        assert!(!PipelineError::NotFound("no such artifact".into()).is_retryable());
    }

    #[test]
    fn infrastructure_failures_stay_off_the_record() {
        assert!(PipelineError::Fetch("404".into()).is_attempt_failure());
        assert!(!PipelineError::Infrastructure("db gone".into()).is_attempt_failure());
        assert!(!PipelineError::Conflict("in flight".into()).is_attempt_failure());
    }
}
