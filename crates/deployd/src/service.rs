//! Submission service - the boundary exposed to the request layer.
//!
//! The dedup guard lives here, before anything touches the queue: an
//! artifact that is `pending` (in flight) or `deployed` (done) rejects a
//! new submission with a conflict; only `failed` or absent records may be
//! (re)submitted. The queue's partial unique index backs the guard under
//! concurrent submission, so racing submitters get exactly one acceptance.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use deployd_protocol::defaults::RELAY_CONTRACT_NAME;
use deployd_protocol::{
    ArtifactPage, ArtifactRecord, ArtifactStatus, JobId, JobPayload, JobState, JobStatusResponse,
    NewArtifact, Pagination, PipelineError, QueueStatsResponse, SubmitAccepted, SubmitOptions,
};
use deployd_pipeline::relay::{relay_constructor_args, synthesize_relay_id};
use deployd_store::{ArtifactPatch, ArtifactRegistry, JobQueue};
use tracing::info;

const MAX_PAGE_LIMIT: u32 = 100;

/// Submission input. The registration fields are used only when the
/// artifact record does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub artifact_id: String,
    pub name: Option<String>,
    pub source_key: Option<String>,
    pub source_url: Option<String>,
    pub constructor_args: Vec<serde_json::Value>,
    pub options: SubmitOptions,
}

#[derive(Clone)]
pub struct DeployService {
    registry: Arc<dyn ArtifactRegistry>,
    queue: JobQueue,
}

impl DeployService {
    pub fn new(registry: Arc<dyn ArtifactRegistry>, queue: JobQueue) -> Self {
        Self { registry, queue }
    }

    /// Accept or reject a deployment submission. Returns immediately; the
    /// attempt itself runs on a worker.
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitAccepted, PipelineError> {
        let artifact_id = req.artifact_id.trim();
        if artifact_id.is_empty() {
            return Err(PipelineError::Validation("artifactId is required".to_string()));
        }

        match self.registry.find(artifact_id).await? {
            Some(record) => match record.status {
                ArtifactStatus::Pending => {
                    return Err(PipelineError::Conflict(format!(
                        "deployment of '{artifact_id}' is already in progress"
                    )));
                }
                ArtifactStatus::Deployed => {
                    return Err(PipelineError::Conflict(format!(
                        "artifact '{artifact_id}' is already deployed"
                    )));
                }
                ArtifactStatus::Failed => {
                    // Resubmission: back to pending before the job exists,
                    // so a racing second submit sees the guard
                    self.registry
                        .update(artifact_id, ArtifactPatch::reset())
                        .await?;
                }
            },
            None => {
                if req.source_key.is_none() && req.source_url.is_none() {
                    return Err(PipelineError::NotFound(format!(
                        "artifact '{artifact_id}' is not registered and no source locator was provided"
                    )));
                }
                self.registry
                    .create(NewArtifact {
                        artifact_id: artifact_id.to_string(),
                        name: req.name.clone(),
                        source_key: req.source_key.clone(),
                        source_url: req.source_url.clone(),
                        constructor_args: req.constructor_args.clone(),
                    })
                    .await?;
            }
        }

        let payload = JobPayload::standard(artifact_id);
        let job_id = self.queue.enqueue(&payload, &req.options).await?;

        info!(artifact_id, job_id = %job_id, "submission accepted");
        Ok(SubmitAccepted {
            job_id,
            artifact_id: artifact_id.to_string(),
            status: JobState::Queued,
        })
    }

    /// Auxiliary deployment: a fresh relay artifact bound to an
    /// already-deployed address, submitted with that address as the sole
    /// constructor argument.
    pub async fn submit_relay(
        &self,
        target: &str,
        options: SubmitOptions,
    ) -> Result<SubmitAccepted, PipelineError> {
        let target = Address::from_str(target.trim()).map_err(|_| {
            PipelineError::Validation(format!("'{target}' is not a valid target address"))
        })?;

        let artifact_id = synthesize_relay_id();
        self.registry
            .create(NewArtifact {
                artifact_id: artifact_id.clone(),
                name: Some(RELAY_CONTRACT_NAME.to_string()),
                source_key: None,
                source_url: None,
                constructor_args: relay_constructor_args(target),
            })
            .await?;

        let payload = JobPayload::relay(artifact_id.clone(), target);
        let job_id = self.queue.enqueue(&payload, &options).await?;

        info!(artifact_id, %target, job_id = %job_id, "relay submission accepted");
        Ok(SubmitAccepted {
            job_id,
            artifact_id,
            status: JobState::Queued,
        })
    }

    /// Point-in-time job view. Never blocks, never mutates.
    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusResponse, PipelineError> {
        let job = self
            .queue
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id} does not exist")))?;

        let timestamp = DateTime::<Utc>::from_timestamp_millis(job.submitted_at).ok_or_else(|| {
            PipelineError::Infrastructure(format!("job {job_id} has a corrupt submission time"))
        })?;

        Ok(JobStatusResponse {
            job_id: job.id,
            status: job.state,
            progress: job.progress,
            data: job.payload,
            timestamp,
        })
    }

    pub async fn artifact_status(&self, artifact_id: &str) -> Result<ArtifactRecord, PipelineError> {
        self.registry
            .find(artifact_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("artifact '{artifact_id}' does not exist")))
    }

    pub async fn stats(&self) -> Result<QueueStatsResponse, PipelineError> {
        self.queue.stats().await
    }

    /// Filtered, newest-first artifact page.
    pub async fn list_artifacts(
        &self,
        status: Option<ArtifactStatus>,
        page: u32,
        limit: u32,
    ) -> Result<ArtifactPage, PipelineError> {
        if page == 0 {
            return Err(PipelineError::Validation("page starts at 1".to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(PipelineError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        let (items, total) = self.registry.list(status, page, limit).await?;
        Ok(ArtifactPage {
            items,
            pagination: Pagination::new(page, limit, total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployd_protocol::defaults::RELAY_ARTIFACT_PREFIX;
    use deployd_store::Store;

    async fn service() -> DeployService {
        let store = Store::open_in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        DeployService::new(Arc::new(store.registry()), store.queue())
    }

    fn request(artifact_id: &str) -> SubmitRequest {
        SubmitRequest {
            artifact_id: artifact_id.to_string(),
            name: Some("Token".to_string()),
            source_key: Some(format!("sources/{artifact_id}.sol")),
            ..SubmitRequest::default()
        }
    }

    #[tokio::test]
    async fn first_submission_registers_and_queues() {
        let svc = service().await;

        let accepted = svc.submit(request("c1")).await.unwrap();
        assert_eq!(accepted.artifact_id, "c1");
        assert_eq!(accepted.status, JobState::Queued);

        let record = svc.artifact_status("c1").await.unwrap();
        assert_eq!(record.status, ArtifactStatus::Pending);

        let job = svc.job_status(accepted.job_id).await.unwrap();
        assert_eq!(job.status, JobState::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.data.artifact_id, "c1");
    }

    #[tokio::test]
    async fn pending_artifact_rejects_resubmission() {
        let svc = service().await;
        svc.submit(request("c1")).await.unwrap();

        let err = svc.submit(request("c1")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)), "got {err:?}");

        // Still exactly one job
        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn empty_artifact_id_is_a_validation_error() {
        let svc = service().await;
        let err = svc.submit(request("  ")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn unregistered_artifact_without_locator_is_not_found() {
        let svc = service().await;
        let err = svc
            .submit(SubmitRequest {
                artifact_id: "ghost".to_string(),
                ..SubmitRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn relay_submission_synthesizes_a_prefixed_artifact() {
        let svc = service().await;

        let accepted = svc
            .submit_relay(
                "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd",
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        assert!(accepted.artifact_id.starts_with(RELAY_ARTIFACT_PREFIX));

        let record = svc.artifact_status(&accepted.artifact_id).await.unwrap();
        assert_eq!(record.name.as_deref(), Some(RELAY_CONTRACT_NAME));
        assert_eq!(record.constructor_args.len(), 1);

        let job = svc.job_status(accepted.job_id).await.unwrap();
        assert_eq!(job.data.kind, deployd_protocol::JobKind::Relay);
        assert!(job.data.bound_address.is_some());
    }

    #[tokio::test]
    async fn relay_submission_rejects_a_malformed_address() {
        let svc = service().await;
        let err = svc
            .submit_relay("0x1234", SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_job_and_artifact_are_not_found() {
        let svc = service().await;
        assert!(matches!(
            svc.job_status(JobId::new(999)).await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            svc.artifact_status("ghost").await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_rejects_out_of_range_paging() {
        let svc = service().await;
        assert!(matches!(
            svc.list_artifacts(None, 0, 10).await.unwrap_err(),
            PipelineError::Validation(_)
        ));
        assert!(matches!(
            svc.list_artifacts(None, 1, 0).await.unwrap_err(),
            PipelineError::Validation(_)
        ));
        assert!(matches!(
            svc.list_artifacts(None, 1, 101).await.unwrap_err(),
            PipelineError::Validation(_)
        ));
    }
}
