//! The deployment pipeline: fetch -> compile -> deploy -> persist.
//!
//! Design principles:
//! - External collaborators (object storage, compiler toolchain, ledger
//!   client) sit behind async traits; production impls live next to them
//! - One attempt is one call to [`Orchestrator::run_attempt`]; it owns the
//!   record state machine and never retries internally
//! - Retry/backoff belongs to the dispatcher so it applies uniformly
//!   regardless of which step failed

pub mod compile;
pub mod deploy;
pub mod fetch;
pub mod orchestrator;
pub mod relay;
pub mod testing;
pub mod workspace;

pub use compile::{compile_selected, select_entry, CompilerToolchain, SolcToolchain};
pub use deploy::{ChainDeployer, DeploymentRequest, HttpLedgerClient, LedgerClient};
pub use fetch::{acquire_source, resolve_strategies, HttpSourceStore, SourceStore, SourceStrategy};
pub use orchestrator::{NullSink, Orchestrator, ProgressSink};
pub use workspace::SourceWorkspace;
