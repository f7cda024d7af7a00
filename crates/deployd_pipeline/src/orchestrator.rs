//! Deployment orchestrator: exactly one attempt, end-to-end.
//!
//! The orchestrator owns the artifact state machine during an attempt.
//! Every mutation is a fresh read-modify-write through the registry - no
//! record copy survives a suspension point. Retry/backoff is deliberately
//! absent here; it lives in the dispatcher so it applies uniformly
//! regardless of which step failed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deployd_protocol::defaults::{
    PROGRESS_COMMIT, PROGRESS_COMPILE, PROGRESS_DEPLOY, PROGRESS_DONE, PROGRESS_FETCH,
};
use deployd_protocol::{DeployReceipt, JobKind, JobPayload, PipelineError};
use deployd_store::{ArtifactPatch, ArtifactRegistry};
use tracing::{info, warn};

use crate::compile::{compile_selected, CompilerToolchain};
use crate::deploy::ChainDeployer;
use crate::fetch::{acquire_source, SourceStore};
use crate::relay::{relay_constructor_args, RELAY_SOURCE};
use crate::workspace::SourceWorkspace;

/// Progress checkpoint reporting; doubles as the liveness heartbeat.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, pct: u8);
}

/// No-op sink for callers that don't track progress.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn progress(&self, _pct: u8) {}
}

pub struct Orchestrator {
    registry: Arc<dyn ArtifactRegistry>,
    sources: Arc<dyn SourceStore>,
    compiler: Arc<dyn CompilerToolchain>,
    deployer: ChainDeployer,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn ArtifactRegistry>,
        sources: Arc<dyn SourceStore>,
        compiler: Arc<dyn CompilerToolchain>,
        deployer: ChainDeployer,
    ) -> Self {
        Self {
            registry,
            sources,
            compiler,
            deployer,
        }
    }

    /// Run one deployment attempt. On success the record is `deployed`
    /// with its result fields committed; on an attempt-level failure the
    /// record is `failed` with the error message recorded, and the error
    /// is re-raised for the dispatcher to judge.
    pub async fn run_attempt(
        &self,
        payload: &JobPayload,
        progress: &dyn ProgressSink,
    ) -> Result<DeployReceipt, PipelineError> {
        match self.attempt(payload, progress).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                if err.is_attempt_failure() {
                    if let Err(write_err) = self
                        .registry
                        .update(&payload.artifact_id, ArtifactPatch::failed(err.to_string()))
                        .await
                    {
                        warn!(
                            artifact_id = %payload.artifact_id,
                            %write_err,
                            "could not record attempt failure on the artifact"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        payload: &JobPayload,
        progress: &dyn ProgressSink,
    ) -> Result<DeployReceipt, PipelineError> {
        let artifact_id = payload.artifact_id.as_str();

        self.registry.find(artifact_id).await?.ok_or_else(|| {
            PipelineError::NotFound(format!("artifact '{artifact_id}' does not exist"))
        })?;

        // Clean slate: every attempt starts pending with no stale error
        let record = self
            .registry
            .update(artifact_id, ArtifactPatch::reset())
            .await?;

        progress.progress(PROGRESS_FETCH).await;
        let source = match payload.kind {
            JobKind::Standard => acquire_source(&*self.sources, &record).await?,
            JobKind::Relay => RELAY_SOURCE.to_string(),
        };

        // Scoped to the attempt; removed on every exit path
        let workspace = SourceWorkspace::stage(artifact_id, &source)?;

        progress.progress(PROGRESS_COMPILE).await;
        let entry = compile_selected(
            &*self.compiler,
            workspace.entry_path(),
            record.name.as_deref(),
        )
        .await?;

        progress.progress(PROGRESS_DEPLOY).await;
        let constructor_args = match payload.kind {
            JobKind::Standard => record.constructor_args.clone(),
            JobKind::Relay => {
                let target = payload.bound_address.ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "relay job for '{artifact_id}' has no bound address"
                    ))
                })?;
                relay_constructor_args(target)
            }
        };
        let receipt = self
            .deployer
            .deploy(&entry.bytecode, &entry.abi, &constructor_args)
            .await?;

        progress.progress(PROGRESS_COMMIT).await;
        self.registry
            .update(
                artifact_id,
                ArtifactPatch::deployed(entry.name.clone(), receipt.address, receipt.tx_hash, Utc::now()),
            )
            .await?;

        progress.progress(PROGRESS_DONE).await;
        info!(
            artifact_id,
            name = %entry.name,
            address = %receipt.address,
            tx_hash = %receipt.tx_hash,
            "deployment committed"
        );
        Ok(receipt)
    }
}
