//! Record and payload types shared across all crates.

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::defaults;

// ============================================================================
// Canonical Enums (used across all crates)
// ============================================================================

/// Artifact lifecycle status - the registry-side state machine.
/// This is the CANONICAL definition - use this everywhere.
///
/// Transitions are validated at every write via [`ArtifactStatus::can_transition`];
/// `deployed` is terminal, `failed` is terminal but re-enterable by resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// Record created, or an attempt is in flight
    #[default]
    Pending,
    /// Deployed on chain (terminal, success)
    Deployed,
    /// Last attempt failed (eligible for resubmission)
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Deployed => "deployed",
            ArtifactStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Deployed | ArtifactStatus::Failed)
    }

    /// The finite transition table. `Pending -> Pending` is the idempotent
    /// attempt reset; `Deployed` admits no further writes.
    pub fn can_transition(&self, next: ArtifactStatus) -> bool {
        match self {
            ArtifactStatus::Pending => true,
            ArtifactStatus::Failed => matches!(next, ArtifactStatus::Pending),
            ArtifactStatus::Deployed => false,
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ArtifactStatus::Pending),
            "deployed" => Ok(ArtifactStatus::Deployed),
            "failed" => Ok(ArtifactStatus::Failed),
            _ => Err(format!("Invalid artifact status: '{}'", s)),
        }
    }
}

/// Job lifecycle state - the queue-side state machine.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Enqueued, waiting for a worker (or waiting out a retry delay)
    #[default]
    Queued,
    /// Claimed by a worker, attempt in progress
    Active,
    /// Attempt succeeded (terminal)
    Completed,
    /// Attempts exhausted or non-retryable error (terminal)
    Failed,
    /// Worker stopped heartbeating mid-attempt; eligible for reclaim
    Stalled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stalled => "stalled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// States covered by the at-most-one-job-per-artifact guard.
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Active | JobState::Stalled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "stalled" => Ok(JobState::Stalled),
            _ => Err(format!("Invalid job state: '{}'", s)),
        }
    }
}

/// What a job deploys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Fetch the artifact's own source, compile, deploy
    #[default]
    Standard,
    /// Deploy the fixed verification-relay contract bound to an
    /// already-deployed address; no fetch, source synthesized in-process
    Relay,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Standard => "standard",
            JobKind::Relay => "relay",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(JobKind::Standard),
            "relay" => Ok(JobKind::Relay),
            _ => Err(format!("Invalid job kind: '{}'", s)),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Queue-assigned job identifier. Distinct from the artifact id: many jobs
/// may reference the same artifact over time (resubmissions).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<JobId> for i64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

// ============================================================================
// Artifact records
// ============================================================================

/// One logical deployable unit, keyed by a caller-supplied unique id.
///
/// Owned exclusively by the artifact registry; mutated only through
/// registry patches, which validate the status transition table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub artifact_id: String,
    /// Display name; overwritten post-compile with the compiler-selected
    /// entry name, which is authoritative
    pub name: Option<String>,
    /// Object-storage key (preferred source locator)
    pub source_key: Option<String>,
    /// Direct URL (fallback source locator)
    pub source_url: Option<String>,
    /// Opaque values passed verbatim to the deploy step
    pub constructor_args: Vec<serde_json::Value>,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn has_source(&self) -> bool {
        self.source_key.is_some() || self.source_url.is_some()
    }
}

/// Creation input for a new artifact record. Status always starts `pending`.
#[derive(Debug, Clone, Default)]
pub struct NewArtifact {
    pub artifact_id: String,
    pub name: Option<String>,
    pub source_key: Option<String>,
    pub source_url: Option<String>,
    pub constructor_args: Vec<serde_json::Value>,
}

// ============================================================================
// Job records
// ============================================================================

/// What the worker needs to run one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub artifact_id: String,
    pub kind: JobKind,
    /// Relay jobs only: the already-deployed address the relay binds to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_address: Option<Address>,
}

impl JobPayload {
    pub fn standard(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            kind: JobKind::Standard,
            bound_address: None,
        }
    }

    pub fn relay(artifact_id: impl Into<String>, bound_address: Address) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            kind: JobKind::Relay,
            bound_address: Some(bound_address),
        }
    }
}

/// One enqueued unit of work. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    /// 0-100, monotone within an attempt, reset to 0 on retry
    pub progress: u8,
    /// Claims made so far (incremented when a worker claims the job)
    pub attempts: i32,
    pub max_attempts: i32,
    pub priority: i64,
    /// Earliest eligible dequeue time
    pub scheduled_at: i64,
    pub submitted_at: i64,
    pub claim_time: Option<i64>,
    pub heartbeat_time: Option<i64>,
    pub end_time: Option<i64>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Submission knobs. Defaults: priority 0, no delay, 3 attempts.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// Higher priority is served first
    pub priority: i64,
    /// Earliest-dequeue delay in milliseconds
    pub delay_ms: u64,
    pub max_attempts: i32,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay_ms: 0,
            max_attempts: defaults::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

// ============================================================================
// Compiler / deployer results
// ============================================================================

/// Severity of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl FromStr for DiagnosticSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(DiagnosticSeverity::Error),
            "warning" => Ok(DiagnosticSeverity::Warning),
            "info" => Ok(DiagnosticSeverity::Info),
            _ => Err(format!("Invalid diagnostic severity: '{}'", s)),
        }
    }
}

/// One compiler-reported diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
}

/// One named deployable entry produced by a compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledEntry {
    pub name: String,
    pub bytecode: Bytes,
    /// Interface description (function/event signatures) as emitted by the
    /// compiler
    pub abi: serde_json::Value,
}

/// Raw compiler result: diagnostics plus zero-or-more entries in
/// compiler-reported order. The adapter never sorts `entries`.
#[derive(Debug, Clone, Default)]
pub struct CompilerOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub entries: Vec<CompiledEntry>,
}

impl CompilerOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn error_messages(&self) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .map(|d| d.message.as_str())
            .collect()
    }
}

/// Outcome of a confirmed contract-creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReceipt {
    pub address: Address,
    pub tx_hash: B256,
}
