//! Canonical default values shared across the control plane.

pub const DEFAULT_DB_PATH: &str = "deployd.sqlite";

/// Attempts per job, including the first.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Delay before the first retry; doubles per attempt (2s, 4s, 8s, ...).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;

/// Most-recent terminal jobs kept for status inspection before pruning.
pub const DEFAULT_RETAIN_COMPLETED: i64 = 100;
pub const DEFAULT_RETAIN_FAILED: i64 = 50;

/// Active jobs without a heartbeat for this long are marked stalled.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// How often the sweeper marks stalls, requeues, and prunes.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

/// Worker poll interval while the queue is empty.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

pub const DEFAULT_WORKERS: usize = 2;

// ============================================================================
// Progress checkpoints (0-100)
// ============================================================================

pub const PROGRESS_FETCH: u8 = 10;
pub const PROGRESS_COMPILE: u8 = 40;
pub const PROGRESS_DEPLOY: u8 = 70;
pub const PROGRESS_COMMIT: u8 = 90;
pub const PROGRESS_DONE: u8 = 100;

// ============================================================================
// Relay (auxiliary) deployments
// ============================================================================

/// Prefix of synthesized relay artifact ids.
pub const RELAY_ARTIFACT_PREFIX: &str = "relay-";

/// Contract name of the relay template.
pub const RELAY_CONTRACT_NAME: &str = "VerificationRelay";
