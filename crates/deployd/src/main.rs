//! deployd launcher.
//!
//! `serve` runs the worker pool and sweeper with graceful shutdown; the
//! remaining commands are one-shot wrappers over the submission service
//! printing JSON, sharing the same state store.

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use deployd::{config::SystemConfig, logging, service::SubmitRequest, DeployService};
use deployd_pipeline::{
    ChainDeployer, HttpLedgerClient, HttpSourceStore, Orchestrator, SolcToolchain,
};
use deployd_protocol::{ArtifactStatus, ErrorBody, JobId, PipelineError, SubmitOptions};
use deployd_store::Store;
use reqwest::Url;
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "deployd", about = "Contract deployment control plane")]
struct Cli {
    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(flatten)]
    config: SystemConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker pool until interrupted
    Serve,

    /// Submit an artifact for deployment
    Submit {
        /// Caller-supplied unique artifact id
        artifact_id: String,

        /// Declared contract name (compile hint)
        #[arg(long)]
        name: Option<String>,

        /// Object storage key of the source (registers the artifact if new)
        #[arg(long)]
        source_key: Option<String>,

        /// Fallback source URL
        #[arg(long)]
        source_url: Option<String>,

        /// Constructor arguments as a JSON array
        #[arg(long, default_value = "[]")]
        args: String,

        /// Queue priority (higher served first)
        #[arg(long, default_value_t = 0)]
        priority: i64,

        /// Earliest-dequeue delay in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },

    /// Deploy a verification relay bound to an already-deployed address
    Relay {
        /// Target contract address (0x + 40 hex chars)
        address: String,
    },

    /// Show a job's state and progress
    Job {
        /// Queue-assigned job id
        id: i64,
    },

    /// Show an artifact record
    Artifact {
        /// Artifact id
        id: String,
    },

    /// List artifacts, newest-first
    List {
        /// Filter by status (pending, deployed, failed)
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Show queue bucket counts
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init_logging(cli.verbose) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let body = ErrorBody::from(&err);
            println!("{}", serde_json::to_string_pretty(&body).expect("serializable error"));
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PipelineError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::Infrastructure(format!("unserializable response: {e}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    let config = cli.config;

    let store = Store::open(&config.db_path).await?;
    store.init_schema().await?;
    let service = DeployService::new(Arc::new(store.registry()), store.queue());

    let result = match cli.command {
        Commands::Serve => serve(&config, &store).await,

        Commands::Submit {
            artifact_id,
            name,
            source_key,
            source_url,
            args,
            priority,
            delay_ms,
        } => {
            let constructor_args: Vec<serde_json::Value> =
                serde_json::from_str(&args).map_err(|e| {
                    PipelineError::Validation(format!("--args must be a JSON array: {e}"))
                })?;
            let accepted = service
                .submit(SubmitRequest {
                    artifact_id,
                    name,
                    source_key,
                    source_url,
                    constructor_args,
                    options: SubmitOptions {
                        priority,
                        delay_ms,
                        max_attempts: config.max_attempts,
                    },
                })
                .await?;
            print_json(&accepted)
        }

        Commands::Relay { address } => {
            let accepted = service
                .submit_relay(
                    &address,
                    SubmitOptions {
                        max_attempts: config.max_attempts,
                        ..SubmitOptions::default()
                    },
                )
                .await?;
            print_json(&accepted)
        }

        Commands::Job { id } => {
            let status = service.job_status(JobId::new(id)).await?;
            print_json(&status)
        }

        Commands::Artifact { id } => {
            let record = service.artifact_status(&id).await?;
            print_json(&record)
        }

        Commands::List {
            status,
            page,
            limit,
        } => {
            let status = status
                .map(|s| {
                    ArtifactStatus::from_str(&s)
                        .map_err(PipelineError::Validation)
                })
                .transpose()?;
            let page_result = service.list_artifacts(status, page, limit).await?;
            print_json(&page_result)
        }

        Commands::Stats => {
            let stats = service.stats().await?;
            print_json(&stats)
        }
    };

    store.close().await;
    result
}

async fn serve(config: &SystemConfig, store: &Store) -> Result<(), PipelineError> {
    let storage_base = Url::parse(&config.storage_url).map_err(|e| {
        PipelineError::Validation(format!("invalid storage URL '{}': {e}", config.storage_url))
    })?;
    let ledger_base = Url::parse(&config.ledger_url).map_err(|e| {
        PipelineError::Validation(format!("invalid ledger URL '{}': {e}", config.ledger_url))
    })?;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(store.registry()),
        Arc::new(HttpSourceStore::new(storage_base)),
        Arc::new(SolcToolchain::new(config.solc_path.clone())),
        ChainDeployer::new(Arc::new(HttpLedgerClient::new(
            ledger_base,
            Duration::from_millis(config.confirm_poll_ms),
            Duration::from_secs(config.confirm_timeout_secs),
        ))),
    ));

    let pool = deployd::spawn_workers(config, store.queue(), orchestrator);
    info!(db = %config.db_path.display(), "deployd serving; press ctrl-c to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "signal listener failed; shutting down");
    }

    info!("shutdown signal received");
    pool.shutdown().await;
    Ok(())
}
