//! SQLite-backed persistence for deployd.
//!
//! Two stores share one pool:
//! - the artifact registry (`dp_artifacts`) - one row per logical
//!   deployable, status-transition-checked at every write;
//! - the durable job queue (`dp_jobs`) - atomic claim via transactional
//!   `UPDATE ... WHERE state = 'queued'`, so no two workers process the
//!   same job.
//!
//! The pool has an explicit lifecycle: opened at process start, closed on
//! shutdown. Nothing here is a module-level singleton.

pub mod models;
pub mod queue;
pub mod registry;

pub use queue::JobQueue;
pub use registry::{ArtifactPatch, ArtifactRegistry, SqliteArtifactRegistry};

use std::path::Path;

use deployd_protocol::PipelineError;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Shared handle over both stores. Constructed once, passed into the
/// service and workers.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) a SQLite state store at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, PipelineError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| {
                PipelineError::Infrastructure(format!(
                    "failed to open state store at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. Single connection: every handle must see
    /// the same database.
    pub async fn open_in_memory() -> Result<Self, PipelineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| PipelineError::Infrastructure(format!("failed to open in-memory store: {e}")))?;
        Ok(Self { pool })
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), PipelineError> {
        self.registry().init_schema().await?;
        self.queue().init_schema().await?;
        Ok(())
    }

    pub fn registry(&self) -> SqliteArtifactRegistry {
        SqliteArtifactRegistry::from_pool(self.pool.clone())
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.pool.clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Part of the explicit shutdown path.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
