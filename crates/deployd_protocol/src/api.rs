//! Response shapes for the request-layer boundary.
//!
//! These are the only types with bit-exact shape requirements: field names
//! are camelCase and must not drift, since the HTTP layer serializes them
//! verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::{ArtifactRecord, JobId, JobPayload, JobState};

/// Accepted submission: `{jobId, artifactId, status:"queued"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAccepted {
    pub job_id: JobId,
    pub artifact_id: String,
    pub status: JobState,
}

/// Point-in-time job view: `{jobId, status, progress, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobState,
    pub progress: u8,
    pub data: JobPayload,
    /// Original submission time
    pub timestamp: DateTime<Utc>,
}

/// Queue bucket counts. A snapshot, not transactionally consistent with
/// concurrent mutation. Stalled jobs count as active until reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStatsResponse {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// Pagination envelope for list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let pages = if limit == 0 {
            0
        } else {
            total.div_ceil(limit as u64) as u32
        };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}

/// One page of artifact records, newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPage {
    pub items: Vec<ArtifactRecord>,
    pub pagination: Pagination,
}

/// Structured error body: `{success:false, error:"..."}`. Internal detail
/// does not leak past the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobPayload;

    #[test]
    fn submit_accepted_shape() {
        let accepted = SubmitAccepted {
            job_id: JobId::new(7),
            artifact_id: "c1".to_string(),
            status: JobState::Queued,
        };
        let json = serde_json::to_value(&accepted).unwrap();
        assert_eq!(json["jobId"], 7);
        assert_eq!(json["artifactId"], "c1");
        assert_eq!(json["status"], "queued");
    }

    #[test]
    fn job_status_shape() {
        let status = JobStatusResponse {
            job_id: JobId::new(3),
            status: JobState::Active,
            progress: 40,
            data: JobPayload::standard("c1"),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["jobId"], 3);
        assert_eq!(json["status"], "active");
        assert_eq!(json["progress"], 40);
        assert_eq!(json["data"]["artifactId"], "c1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn pagination_rounds_up() {
        let p = Pagination::new(1, 10, 25);
        assert_eq!(p.pages, 3);
        assert_eq!(Pagination::new(1, 10, 0).pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).pages, 1);
    }

    #[test]
    fn error_body_is_flagged() {
        let body = ErrorBody::from(&PipelineError::Conflict("deployment already in flight".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "conflict: deployment already in flight");
    }
}
