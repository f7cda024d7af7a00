//! Row decoding for the registry and queue tables.
//!
//! Enums and domain primitives are stored as TEXT and parsed at the
//! boundary with error propagation; a row that fails to parse surfaces as
//! an infrastructure error rather than a silent default.

use std::str::FromStr;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use deployd_protocol::{
    ArtifactRecord, ArtifactStatus, JobId, JobKind, JobPayload, JobRecord, JobState, PipelineError,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn infra(err: sqlx::Error) -> PipelineError {
    PipelineError::Infrastructure(err.to_string())
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> PipelineError {
    PipelineError::Infrastructure(format!("corrupt row: bad {column}: {detail}"))
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_rfc3339(column: &str, value: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

fn parse_opt<T: FromStr>(column: &str, value: Option<String>) -> Result<Option<T>, PipelineError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|s| s.parse::<T>().map_err(|e| corrupt(column, e)))
        .transpose()
}

pub(crate) fn artifact_from_row(row: &SqliteRow) -> Result<ArtifactRecord, PipelineError> {
    let status: String = row.try_get("status").map_err(infra)?;
    let status = status
        .parse::<ArtifactStatus>()
        .map_err(|e| corrupt("status", e))?;

    let args: String = row.try_get("constructor_args").map_err(infra)?;
    let constructor_args: Vec<serde_json::Value> =
        serde_json::from_str(&args).map_err(|e| corrupt("constructor_args", e))?;

    let address: Option<String> = row.try_get("address").map_err(infra)?;
    let tx_hash: Option<String> = row.try_get("tx_hash").map_err(infra)?;
    let deployed_at: Option<String> = row.try_get("deployed_at").map_err(infra)?;
    let created_at: String = row.try_get("created_at").map_err(infra)?;
    let updated_at: String = row.try_get("updated_at").map_err(infra)?;

    Ok(ArtifactRecord {
        artifact_id: row.try_get("artifact_id").map_err(infra)?,
        name: row.try_get("name").map_err(infra)?,
        source_key: row.try_get("source_key").map_err(infra)?,
        source_url: row.try_get("source_url").map_err(infra)?,
        constructor_args,
        status,
        address: parse_opt::<Address>("address", address)?,
        tx_hash: parse_opt::<B256>("tx_hash", tx_hash)?,
        deployed_at: deployed_at
            .map(|s| parse_rfc3339("deployed_at", &s))
            .transpose()?,
        error: row.try_get("error").map_err(infra)?,
        created_at: parse_rfc3339("created_at", &created_at)?,
        updated_at: parse_rfc3339("updated_at", &updated_at)?,
    })
}

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<JobRecord, PipelineError> {
    let state: String = row.try_get("state").map_err(infra)?;
    let state = state.parse::<JobState>().map_err(|e| corrupt("state", e))?;

    let kind: String = row.try_get("kind").map_err(infra)?;
    let kind = kind.parse::<JobKind>().map_err(|e| corrupt("kind", e))?;

    let bound_address: Option<String> = row.try_get("bound_address").map_err(infra)?;
    let progress: i64 = row.try_get("progress").map_err(infra)?;

    Ok(JobRecord {
        id: JobId::new(row.try_get("id").map_err(infra)?),
        payload: JobPayload {
            artifact_id: row.try_get("artifact_id").map_err(infra)?,
            kind,
            bound_address: parse_opt::<Address>("bound_address", bound_address)?,
        },
        state,
        progress: progress.clamp(0, 100) as u8,
        attempts: row.try_get("attempts").map_err(infra)?,
        max_attempts: row.try_get("max_attempts").map_err(infra)?,
        priority: row.try_get("priority").map_err(infra)?,
        scheduled_at: row.try_get("scheduled_at").map_err(infra)?,
        submitted_at: row.try_get("submitted_at").map_err(infra)?,
        claim_time: row.try_get("claim_time").map_err(infra)?,
        heartbeat_time: row.try_get("heartbeat_time").map_err(infra)?,
        end_time: row.try_get("end_time").map_err(infra)?,
        worker_id: row.try_get("worker_id").map_err(infra)?,
        error: row.try_get("error").map_err(infra)?,
    })
}
