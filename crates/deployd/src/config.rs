//! Runtime configuration.
//!
//! Everything is an explicit flag with an env fallback, collected once at
//! startup and passed into construction. No module-level state.

use std::path::PathBuf;

use clap::Args;
use deployd_protocol::defaults;

#[derive(Debug, Clone, Args)]
pub struct SystemConfig {
    /// SQLite state store path
    #[arg(long = "db", env = "DEPLOYD_DB", default_value = defaults::DEFAULT_DB_PATH, global = true)]
    pub db_path: PathBuf,

    /// Worker task count
    #[arg(long, env = "DEPLOYD_WORKERS", default_value_t = defaults::DEFAULT_WORKERS)]
    pub workers: usize,

    /// Attempts per job, including the first
    #[arg(long, env = "DEPLOYD_MAX_ATTEMPTS", default_value_t = defaults::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i32,

    /// Base retry delay in milliseconds; doubles per attempt
    #[arg(long, env = "DEPLOYD_BACKOFF_BASE_MS", default_value_t = defaults::DEFAULT_BACKOFF_BASE_MS)]
    pub backoff_base_ms: u64,

    /// Seconds without a heartbeat before an active job is marked stalled
    #[arg(long, env = "DEPLOYD_HEARTBEAT_TIMEOUT_SECS", default_value_t = defaults::DEFAULT_HEARTBEAT_TIMEOUT_SECS)]
    pub heartbeat_timeout_secs: u64,

    /// Sweeper interval in seconds
    #[arg(long, env = "DEPLOYD_SWEEP_INTERVAL_SECS", default_value_t = defaults::DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// Worker poll interval in milliseconds
    #[arg(long, env = "DEPLOYD_POLL_INTERVAL_MS", default_value_t = defaults::DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Completed jobs kept for inspection before pruning
    #[arg(long, env = "DEPLOYD_RETAIN_COMPLETED", default_value_t = defaults::DEFAULT_RETAIN_COMPLETED)]
    pub retain_completed: i64,

    /// Failed jobs kept for inspection before pruning
    #[arg(long, env = "DEPLOYD_RETAIN_FAILED", default_value_t = defaults::DEFAULT_RETAIN_FAILED)]
    pub retain_failed: i64,

    /// Object storage base URL for source fetch by key
    #[arg(long, env = "DEPLOYD_STORAGE_URL", default_value = "http://127.0.0.1:9000/artifacts/")]
    pub storage_url: String,

    /// Signer service base URL for broadcast and confirmation
    #[arg(long, env = "DEPLOYD_LEDGER_URL", default_value = "http://127.0.0.1:8545/")]
    pub ledger_url: String,

    /// Inclusion poll interval in milliseconds
    #[arg(long, env = "DEPLOYD_CONFIRM_POLL_MS", default_value_t = 1_000)]
    pub confirm_poll_ms: u64,

    /// Inclusion timeout in seconds
    #[arg(long, env = "DEPLOYD_CONFIRM_TIMEOUT_SECS", default_value_t = 120)]
    pub confirm_timeout_secs: u64,

    /// Path of the solc binary
    #[arg(long, env = "DEPLOYD_SOLC", default_value = "solc")]
    pub solc_path: PathBuf,
}
