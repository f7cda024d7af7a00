//! Canonical types for the deployd control plane.
//!
//! Everything shared across the registry, queue, pipeline, and request-layer
//! boundary lives here: the status enums and their transition rules, the
//! artifact/job records, the error taxonomy, the API response shapes, and
//! the default tunables. This crate does no I/O.

pub mod api;
pub mod defaults;
pub mod error;
pub mod types;

// Re-export types for convenience
pub use api::{ArtifactPage, ErrorBody, JobStatusResponse, Pagination, QueueStatsResponse, SubmitAccepted};
pub use error::PipelineError;
pub use types::{
    ArtifactRecord,
    ArtifactStatus,
    CompiledEntry,
    CompilerOutput,
    DeployReceipt,
    Diagnostic,
    DiagnosticSeverity,
    JobId,
    JobKind,
    JobPayload,
    JobRecord,
    JobState,
    NewArtifact,
    SubmitOptions,
};
