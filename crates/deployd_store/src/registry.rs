//! Artifact registry: one row per logical deployable unit.
//!
//! All mutation goes through [`ArtifactRegistry::update`], which re-reads
//! the current row inside a transaction and validates the status transition
//! table before writing. Callers never hold a stale copy across a
//! suspension point.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deployd_protocol::{ArtifactRecord, ArtifactStatus, NewArtifact, PipelineError};
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::models::{artifact_from_row, infra, now_rfc3339};

/// Partial update applied through the transition table.
///
/// `error` uses the double-Option convention: `Some(None)` clears the
/// stored error, `None` leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct ArtifactPatch {
    pub status: Option<ArtifactStatus>,
    pub name: Option<String>,
    pub address: Option<Address>,
    pub tx_hash: Option<B256>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub error: Option<Option<String>>,
}

impl ArtifactPatch {
    /// Attempt start: back to `pending` with the prior error cleared.
    pub fn reset() -> Self {
        Self {
            status: Some(ArtifactStatus::Pending),
            error: Some(None),
            ..Self::default()
        }
    }

    /// Successful commit: terminal state plus result fields and the
    /// compiler-selected (authoritative) name.
    pub fn deployed(
        name: impl Into<String>,
        address: Address,
        tx_hash: B256,
        deployed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(ArtifactStatus::Deployed),
            name: Some(name.into()),
            address: Some(address),
            tx_hash: Some(tx_hash),
            deployed_at: Some(deployed_at),
            error: Some(None),
            ..Self::default()
        }
    }

    /// Attempt failure: error message recorded for inspection.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(ArtifactStatus::Failed),
            error: Some(Some(error.into())),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Look up a record by its caller-supplied key.
    async fn find(&self, artifact_id: &str) -> Result<Option<ArtifactRecord>, PipelineError>;

    /// Insert a new record with status `pending`. A duplicate key surfaces
    /// as a conflict, not a generic error.
    async fn create(&self, artifact: NewArtifact) -> Result<ArtifactRecord, PipelineError>;

    /// Read-modify-write under a transaction; rejects writes the transition
    /// table forbids. Returns the updated record.
    async fn update(
        &self,
        artifact_id: &str,
        patch: ArtifactPatch,
    ) -> Result<ArtifactRecord, PipelineError>;

    /// Filtered page of records, newest-first. Returns the page plus the
    /// total matching count.
    async fn list(
        &self,
        status: Option<ArtifactStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<ArtifactRecord>, u64), PipelineError>;
}

/// SQLite-backed registry implementation.
#[derive(Debug, Clone)]
pub struct SqliteArtifactRegistry {
    pool: SqlitePool,
}

impl SqliteArtifactRegistry {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dp_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                artifact_id TEXT NOT NULL UNIQUE,
                name TEXT,
                source_key TEXT,
                source_url TEXT,
                constructor_args TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending',
                address TEXT,
                tx_hash TEXT,
                deployed_at TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dp_artifacts_status
            ON dp_artifacts(status, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for SqliteArtifactRegistry {
    async fn find(&self, artifact_id: &str) -> Result<Option<ArtifactRecord>, PipelineError> {
        let row = sqlx::query("SELECT * FROM dp_artifacts WHERE artifact_id = ?")
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;

        row.as_ref().map(artifact_from_row).transpose()
    }

    async fn create(&self, artifact: NewArtifact) -> Result<ArtifactRecord, PipelineError> {
        let args = serde_json::to_string(&artifact.constructor_args)
            .map_err(|e| PipelineError::Validation(format!("unserializable constructor args: {e}")))?;
        let now = now_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO dp_artifacts
                (artifact_id, name, source_key, source_url, constructor_args, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&artifact.artifact_id)
        .bind(&artifact.name)
        .bind(&artifact.source_key)
        .bind(&artifact.source_url)
        .bind(&args)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false) =>
            {
                return Err(PipelineError::Conflict(format!(
                    "artifact '{}' already exists",
                    artifact.artifact_id
                )));
            }
            Err(e) => return Err(infra(e)),
        }

        debug!(artifact_id = %artifact.artifact_id, "artifact record created");

        self.find(&artifact.artifact_id).await?.ok_or_else(|| {
            PipelineError::Infrastructure(format!(
                "artifact '{}' vanished after insert",
                artifact.artifact_id
            ))
        })
    }

    async fn update(
        &self,
        artifact_id: &str,
        patch: ArtifactPatch,
    ) -> Result<ArtifactRecord, PipelineError> {
        let mut tx = self.pool.begin().await.map_err(infra)?;

        let row = sqlx::query("SELECT * FROM dp_artifacts WHERE artifact_id = ?")
            .bind(artifact_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(infra)?;
        let current = match row.as_ref() {
            Some(row) => artifact_from_row(row)?,
            None => {
                return Err(PipelineError::NotFound(format!(
                    "artifact '{artifact_id}' does not exist"
                )))
            }
        };

        if let Some(next) = patch.status {
            if !current.status.can_transition(next) {
                return Err(PipelineError::Conflict(format!(
                    "illegal status transition {} -> {} for artifact '{}'",
                    current.status, next, artifact_id
                )));
            }
        }

        let status = patch.status.unwrap_or(current.status);
        let name = patch.name.or(current.name);
        let address = patch.address.or(current.address);
        let tx_hash = patch.tx_hash.or(current.tx_hash);
        let deployed_at = patch.deployed_at.or(current.deployed_at);
        let error = match patch.error {
            Some(value) => value,
            None => current.error,
        };

        sqlx::query(
            r#"
            UPDATE dp_artifacts
            SET status = ?,
                name = ?,
                address = ?,
                tx_hash = ?,
                deployed_at = ?,
                error = ?,
                updated_at = ?
            WHERE artifact_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(&name)
        .bind(address.map(|a| a.to_string()))
        .bind(tx_hash.map(|h| h.to_string()))
        .bind(deployed_at.map(|t| t.to_rfc3339()))
        .bind(&error)
        .bind(now_rfc3339())
        .bind(artifact_id)
        .execute(&mut *tx)
        .await
        .map_err(infra)?;

        let row = sqlx::query("SELECT * FROM dp_artifacts WHERE artifact_id = ?")
            .bind(artifact_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(infra)?;
        let updated = artifact_from_row(&row)?;

        tx.commit().await.map_err(infra)?;
        Ok(updated)
    }

    async fn list(
        &self,
        status: Option<ArtifactStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<ArtifactRecord>, u64), PipelineError> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;

        let (total, rows) = match status {
            Some(status) => {
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM dp_artifacts WHERE status = ?")
                        .bind(status.as_str())
                        .fetch_one(&self.pool)
                        .await
                        .map_err(infra)?;
                let rows = sqlx::query(
                    r#"
                    SELECT * FROM dp_artifacts
                    WHERE status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(infra)?;
                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dp_artifacts")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(infra)?;
                let rows = sqlx::query(
                    r#"
                    SELECT * FROM dp_artifacts
                    ORDER BY created_at DESC, id DESC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(limit as i64)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(infra)?;
                (total, rows)
            }
        };

        let records = rows
            .iter()
            .map(artifact_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    async fn setup() -> SqliteArtifactRegistry {
        let store = Store::open_in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        store.registry()
    }

    fn new_artifact(id: &str) -> NewArtifact {
        NewArtifact {
            artifact_id: id.to_string(),
            name: Some("Token".to_string()),
            source_key: Some(format!("sources/{id}.sol")),
            source_url: None,
            constructor_args: vec![serde_json::json!(1000)],
        }
    }

    #[tokio::test]
    async fn create_and_find_roundtrip() {
        let registry = setup().await;

        let created = registry.create(new_artifact("c1")).await.unwrap();
        assert_eq!(created.status, ArtifactStatus::Pending);
        assert_eq!(created.name.as_deref(), Some("Token"));
        assert!(created.error.is_none());

        let found = registry.find("c1").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(registry.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_key_is_a_conflict() {
        let registry = setup().await;
        registry.create(new_artifact("c1")).await.unwrap();

        let err = registry.create(new_artifact("c1")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn deployed_commit_populates_result_fields() {
        let registry = setup().await;
        registry.create(new_artifact("c1")).await.unwrap();

        let addr = Address::with_last_byte(0x11);
        let tx = B256::with_last_byte(0x22);
        let updated = registry
            .update("c1", ArtifactPatch::deployed("ERC20Token", addr, tx, Utc::now()))
            .await
            .unwrap();

        assert_eq!(updated.status, ArtifactStatus::Deployed);
        // The compiler-selected name replaced the declared one
        assert_eq!(updated.name.as_deref(), Some("ERC20Token"));
        assert_eq!(updated.address, Some(addr));
        assert_eq!(updated.tx_hash, Some(tx));
        assert!(updated.deployed_at.is_some());
    }

    #[tokio::test]
    async fn deployed_is_terminal() {
        let registry = setup().await;
        registry.create(new_artifact("c1")).await.unwrap();
        registry
            .update(
                "c1",
                ArtifactPatch::deployed(
                    "Token",
                    Address::with_last_byte(1),
                    B256::with_last_byte(2),
                    Utc::now(),
                ),
            )
            .await
            .unwrap();

        let err = registry.update("c1", ArtifactPatch::reset()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn reset_clears_prior_error() {
        let registry = setup().await;
        registry.create(new_artifact("c1")).await.unwrap();

        let failed = registry
            .update("c1", ArtifactPatch::failed("fetch error: gone"))
            .await
            .unwrap();
        assert_eq!(failed.status, ArtifactStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("fetch error: gone"));

        let reset = registry.update("c1", ArtifactPatch::reset()).await.unwrap();
        assert_eq!(reset.status, ArtifactStatus::Pending);
        assert!(reset.error.is_none());
    }

    #[tokio::test]
    async fn update_of_missing_artifact_is_not_found() {
        let registry = setup().await;
        let err = registry
            .update("ghost", ArtifactPatch::reset())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn list_filters_and_paginates_newest_first() {
        let registry = setup().await;

        for i in 0u8..25 {
            let id = format!("deployed-{i:02}");
            registry.create(new_artifact(&id)).await.unwrap();
            registry
                .update(
                    &id,
                    ArtifactPatch::deployed(
                        "Token",
                        Address::with_last_byte(i),
                        B256::with_last_byte(i),
                        Utc::now(),
                    ),
                )
                .await
                .unwrap();
        }
        for i in 0..5 {
            let id = format!("failed-{i}");
            registry.create(new_artifact(&id)).await.unwrap();
            registry
                .update(&id, ArtifactPatch::failed("deploy error: rejected"))
                .await
                .unwrap();
        }

        let (items, total) = registry
            .list(Some(ArtifactStatus::Deployed), 1, 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(total, 25);
        // Newest-first: the last-created deployed artifact leads the page
        assert_eq!(items[0].artifact_id, "deployed-24");

        let (page3, _) = registry
            .list(Some(ArtifactStatus::Deployed), 3, 10)
            .await
            .unwrap();
        assert_eq!(page3.len(), 5);

        let (all, total_all) = registry.list(None, 1, 50).await.unwrap();
        assert_eq!(total_all, 30);
        assert_eq!(all.len(), 30);
    }
}
