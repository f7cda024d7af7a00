//! Durable job queue.
//!
//! Claiming is atomic: a transaction selects the best eligible job and
//! flips it `queued -> active` with `WHERE state = 'queued'`, so a job
//! raced by two workers is claimed exactly once. The
//! at-most-one-live-job-per-artifact invariant is a partial unique index,
//! not application logic; a violating enqueue surfaces as a conflict.
//!
//! Job timestamps are epoch milliseconds (scheduling arithmetic); the
//! registry keeps RFC 3339 text (display).

use std::time::Duration;

use deployd_protocol::{
    JobId, JobPayload, JobRecord, PipelineError, QueueStatsResponse, SubmitOptions,
};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

use crate::models::{infra, job_from_row, now_millis};

#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dp_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                artifact_id TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'standard',
                bound_address TEXT,
                state TEXT NOT NULL DEFAULT 'queued',
                progress INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                priority INTEGER NOT NULL DEFAULT 0,
                scheduled_at INTEGER NOT NULL,
                submitted_at INTEGER NOT NULL,
                claim_time INTEGER,
                heartbeat_time INTEGER,
                end_time INTEGER,
                worker_id TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        // The dedup guard, enforced structurally
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_dp_jobs_live_artifact
            ON dp_jobs(artifact_id)
            WHERE state IN ('queued', 'active', 'stalled')
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        // Claim scan order
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dp_jobs_claim
            ON dp_jobs(state, priority DESC, id ASC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        Ok(())
    }

    /// Enqueue a job and return its id immediately; processing is
    /// asynchronous. A second live job for the same artifact is a conflict.
    pub async fn enqueue(
        &self,
        payload: &JobPayload,
        opts: &SubmitOptions,
    ) -> Result<JobId, PipelineError> {
        let now = now_millis();
        let scheduled_at = now + opts.delay_ms as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO dp_jobs
                (artifact_id, kind, bound_address, state, priority, max_attempts, scheduled_at, submitted_at)
            VALUES (?, ?, ?, 'queued', ?, ?, ?, ?)
            "#,
        )
        .bind(&payload.artifact_id)
        .bind(payload.kind.as_str())
        .bind(payload.bound_address.map(|a| a.to_string()))
        .bind(opts.priority)
        .bind(opts.max_attempts)
        .bind(scheduled_at)
        .bind(now)
        .execute(&self.pool)
        .await;

        let done = match result {
            Ok(done) => done,
            Err(e) if e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false) =>
            {
                return Err(PipelineError::Conflict(format!(
                    "a job for artifact '{}' is already queued or active",
                    payload.artifact_id
                )));
            }
            Err(e) => return Err(infra(e)),
        };

        let job_id = JobId::new(done.last_insert_rowid());
        info!(job_id = %job_id, artifact_id = %payload.artifact_id, kind = %payload.kind, "job enqueued");
        Ok(job_id)
    }

    /// Atomically claim the best eligible job: highest priority first, then
    /// submission order, skipping jobs still waiting out a retry delay.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<JobRecord>, PipelineError> {
        let mut tx = self.pool.begin().await.map_err(infra)?;
        let now = now_millis();

        let job_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM dp_jobs
            WHERE state = 'queued' AND scheduled_at <= ?
            ORDER BY priority DESC, id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(infra)?;

        let Some(job_id) = job_id else {
            tx.commit().await.map_err(infra)?;
            return Ok(None);
        };

        let rows_affected = sqlx::query(
            r#"
            UPDATE dp_jobs
            SET state = 'active',
                attempts = attempts + 1,
                worker_id = ?,
                claim_time = ?,
                heartbeat_time = ?
            WHERE id = ? AND state = 'queued'
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(infra)?
        .rows_affected();

        if rows_affected == 0 {
            // Claimed by another worker in the meantime
            tx.commit().await.map_err(infra)?;
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM dp_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(infra)?;
        let job = job_from_row(&row)?;

        tx.commit().await.map_err(infra)?;
        debug!(job_id, worker_id, attempt = job.attempts, "job claimed");
        Ok(Some(job))
    }

    /// Progress checkpoint; doubles as the liveness heartbeat.
    pub async fn set_progress(&self, job_id: JobId, progress: u8) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE dp_jobs
            SET progress = ?, heartbeat_time = ?
            WHERE id = ? AND state = 'active'
            "#,
        )
        .bind(progress.min(100) as i64)
        .bind(now_millis())
        .bind(job_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(())
    }

    pub async fn heartbeat(&self, job_id: JobId) -> Result<(), PipelineError> {
        sqlx::query("UPDATE dp_jobs SET heartbeat_time = ? WHERE id = ? AND state = 'active'")
            .bind(now_millis())
            .bind(job_id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(infra)?;
        Ok(())
    }

    pub async fn complete(&self, job_id: JobId) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE dp_jobs
            SET state = 'completed', progress = 100, end_time = ?, error = NULL
            WHERE id = ? AND state = 'active'
            "#,
        )
        .bind(now_millis())
        .bind(job_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        info!(job_id = %job_id, "job completed");
        Ok(())
    }

    /// Terminal failure: attempts exhausted or a non-retryable error.
    pub async fn fail(&self, job_id: JobId, error: &str) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE dp_jobs
            SET state = 'failed', progress = 0, end_time = ?, error = ?
            WHERE id = ? AND state IN ('active', 'stalled')
            "#,
        )
        .bind(now_millis())
        .bind(error)
        .bind(job_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        info!(job_id = %job_id, error, "job failed");
        Ok(())
    }

    /// Put a failed attempt back in the queue after a backoff delay.
    /// Progress drops to 0 as the non-completion signal.
    pub async fn schedule_retry(
        &self,
        job_id: JobId,
        error: &str,
        delay: Duration,
    ) -> Result<(), PipelineError> {
        let scheduled_at = now_millis() + delay.as_millis() as i64;
        sqlx::query(
            r#"
            UPDATE dp_jobs
            SET state = 'queued',
                progress = 0,
                scheduled_at = ?,
                error = ?,
                worker_id = NULL,
                claim_time = NULL,
                heartbeat_time = NULL
            WHERE id = ? AND state = 'active'
            "#,
        )
        .bind(scheduled_at)
        .bind(error)
        .bind(job_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        info!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "retry scheduled");
        Ok(())
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, PipelineError> {
        let row = sqlx::query("SELECT * FROM dp_jobs WHERE id = ?")
            .bind(job_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Bucket counts. Stalled jobs count as active until reclaimed.
    pub async fn stats(&self) -> Result<QueueStatsResponse, PipelineError> {
        #[derive(sqlx::FromRow)]
        struct StatsRow {
            waiting: i64,
            active: i64,
            completed: i64,
            failed: i64,
        }

        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'queued') AS waiting,
                COUNT(*) FILTER (WHERE state IN ('active', 'stalled')) AS active,
                COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                COUNT(*) FILTER (WHERE state = 'failed') AS failed
            FROM dp_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(infra)?;

        Ok(QueueStatsResponse {
            waiting: row.waiting,
            active: row.active,
            completed: row.completed,
            failed: row.failed,
            total: row.waiting + row.active + row.completed + row.failed,
        })
    }

    /// Mark active jobs whose heartbeat expired as stalled. Returns the
    /// affected job ids.
    pub async fn mark_stalled(&self, timeout: Duration) -> Result<Vec<JobId>, PipelineError> {
        let cutoff = now_millis() - timeout.as_millis() as i64;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM dp_jobs
            WHERE state = 'active' AND heartbeat_time IS NOT NULL AND heartbeat_time < ?
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        let mut stalled = Vec::with_capacity(ids.len());
        for id in ids {
            let rows = sqlx::query("UPDATE dp_jobs SET state = 'stalled' WHERE id = ? AND state = 'active'")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(infra)?
                .rows_affected();
            if rows > 0 {
                warn!(job_id = id, "worker stopped heartbeating; job marked stalled");
                stalled.push(JobId::new(id));
            }
        }
        Ok(stalled)
    }

    /// Requeue stalled jobs whose heartbeat has been silent past the grace
    /// cutoff. The original worker must be presumed dead by then; a deploy
    /// failure on the replay requires manual address verification.
    pub async fn requeue_stalled(&self, grace: Duration) -> Result<Vec<JobId>, PipelineError> {
        let cutoff = now_millis() - grace.as_millis() as i64;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM dp_jobs
            WHERE state = 'stalled' AND (heartbeat_time IS NULL OR heartbeat_time < ?)
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        let mut requeued = Vec::with_capacity(ids.len());
        for id in ids {
            let rows = sqlx::query(
                r#"
                UPDATE dp_jobs
                SET state = 'queued',
                    progress = 0,
                    scheduled_at = ?,
                    worker_id = NULL,
                    claim_time = NULL,
                    heartbeat_time = NULL
                WHERE id = ? AND state = 'stalled'
                "#,
            )
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(infra)?
            .rows_affected();
            if rows > 0 {
                warn!(
                    job_id = id,
                    "stalled job requeued; verify the deployed address manually if the replay reports a deploy error"
                );
                requeued.push(JobId::new(id));
            }
        }
        Ok(requeued)
    }

    /// Prune terminal buckets to their most-recent retention bounds.
    /// Pruning never touches artifact records.
    pub async fn prune(
        &self,
        retain_completed: i64,
        retain_failed: i64,
    ) -> Result<u64, PipelineError> {
        let mut removed = 0u64;
        for (state, retain) in [("completed", retain_completed), ("failed", retain_failed)] {
            let result = sqlx::query(
                r#"
                DELETE FROM dp_jobs
                WHERE state = ?1 AND id NOT IN (
                    SELECT id FROM dp_jobs WHERE state = ?1 ORDER BY id DESC LIMIT ?2
                )
                "#,
            )
            .bind(state)
            .bind(retain)
            .execute(&self.pool)
            .await
            .map_err(infra)?;
            removed += result.rows_affected();
        }
        if removed > 0 {
            debug!(removed, "pruned terminal jobs");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use deployd_protocol::{JobKind, JobState};

    async fn setup() -> JobQueue {
        let store = Store::open_in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        store.queue()
    }

    fn opts() -> SubmitOptions {
        SubmitOptions::default()
    }

    #[tokio::test]
    async fn claim_on_empty_queue_is_none() {
        let queue = setup().await;
        assert!(queue.claim("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_follows_priority_then_submission_order() {
        let queue = setup().await;

        queue.enqueue(&JobPayload::standard("low"), &opts()).await.unwrap();
        queue
            .enqueue(
                &JobPayload::standard("high"),
                &SubmitOptions {
                    priority: 10,
                    ..opts()
                },
            )
            .await
            .unwrap();
        queue
            .enqueue(
                &JobPayload::standard("mid"),
                &SubmitOptions {
                    priority: 5,
                    ..opts()
                },
            )
            .await
            .unwrap();

        let first = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(first.payload.artifact_id, "high");
        assert_eq!(first.state, JobState::Active);
        assert_eq!(first.attempts, 1);

        let second = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(second.payload.artifact_id, "mid");

        let third = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(third.payload.artifact_id, "low");
    }

    #[tokio::test]
    async fn delayed_job_is_not_eligible_yet() {
        let queue = setup().await;
        queue
            .enqueue(
                &JobPayload::standard("later"),
                &SubmitOptions {
                    delay_ms: 60_000,
                    ..opts()
                },
            )
            .await
            .unwrap();

        assert!(queue.claim("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_live_job_for_same_artifact_conflicts() {
        let queue = setup().await;
        queue.enqueue(&JobPayload::standard("c1"), &opts()).await.unwrap();

        let err = queue
            .enqueue(&JobPayload::standard("c1"), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)), "got {err:?}");

        // Still blocked while active
        let job = queue.claim("w1").await.unwrap().unwrap();
        let err = queue
            .enqueue(&JobPayload::standard("c1"), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));

        // A terminal job frees the key
        queue.complete(job.id).await.unwrap();
        queue.enqueue(&JobPayload::standard("c1"), &opts()).await.unwrap();
    }

    #[tokio::test]
    async fn retry_requeues_with_reset_progress() {
        let queue = setup().await;
        let job_id = queue.enqueue(&JobPayload::standard("c1"), &opts()).await.unwrap();

        let job = queue.claim("w1").await.unwrap().unwrap();
        queue.set_progress(job.id, 40).await.unwrap();
        queue
            .schedule_retry(job.id, "fetch error: timeout", Duration::from_millis(0))
            .await
            .unwrap();

        let job = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("fetch error: timeout"));
        assert!(job.worker_id.is_none());

        // Claimable again, attempt counter advances
        let job = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn complete_and_fail_are_terminal() {
        let queue = setup().await;
        queue.enqueue(&JobPayload::standard("ok"), &opts()).await.unwrap();
        queue.enqueue(&JobPayload::standard("bad"), &opts()).await.unwrap();

        let ok = queue.claim("w1").await.unwrap().unwrap();
        queue.set_progress(ok.id, 90).await.unwrap();
        queue.complete(ok.id).await.unwrap();
        let ok = queue.get(ok.id).await.unwrap().unwrap();
        assert_eq!(ok.state, JobState::Completed);
        assert_eq!(ok.progress, 100);
        assert!(ok.end_time.is_some());

        let bad = queue.claim("w1").await.unwrap().unwrap();
        queue.fail(bad.id, "compile error: bad pragma").await.unwrap();
        let bad = queue.get(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.state, JobState::Failed);
        assert_eq!(bad.progress, 0);
        assert_eq!(bad.error.as_deref(), Some("compile error: bad pragma"));
    }

    #[tokio::test]
    async fn relay_payload_roundtrips_through_the_queue() {
        let queue = setup().await;
        let addr = alloy_primitives::Address::with_last_byte(0xab);
        queue
            .enqueue(&JobPayload::relay("relay-1", addr), &opts())
            .await
            .unwrap();

        let job = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(job.payload.kind, JobKind::Relay);
        assert_eq!(job.payload.bound_address, Some(addr));
    }

    #[tokio::test]
    async fn stall_sweep_and_requeue() {
        let queue = setup().await;
        let job_id = queue.enqueue(&JobPayload::standard("c1"), &opts()).await.unwrap();
        queue.claim("w1").await.unwrap().unwrap();

        // Heartbeat is fresh: nothing stalls
        assert!(queue.mark_stalled(Duration::from_secs(60)).await.unwrap().is_empty());

        // Zero timeout: the job stalls immediately
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stalled = queue.mark_stalled(Duration::from_millis(1)).await.unwrap();
        assert_eq!(stalled, vec![job_id]);
        let job = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Stalled);

        // Not yet past the grace window
        assert!(queue.requeue_stalled(Duration::from_secs(60)).await.unwrap().is_empty());

        let requeued = queue.requeue_stalled(Duration::from_millis(1)).await.unwrap();
        assert_eq!(requeued, vec![job_id]);
        let job = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn stats_buckets_add_up() {
        let queue = setup().await;
        for i in 0..4 {
            queue
                .enqueue(&JobPayload::standard(format!("c{i}")), &opts())
                .await
                .unwrap();
        }
        let a = queue.claim("w1").await.unwrap().unwrap();
        let b = queue.claim("w1").await.unwrap().unwrap();
        queue.complete(a.id).await.unwrap();
        queue.fail(b.id, "deploy error: rejected").await.unwrap();
        queue.claim("w1").await.unwrap().unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 4);
    }

    #[tokio::test]
    async fn prune_keeps_most_recent_terminal_jobs() {
        let queue = setup().await;
        let mut completed_ids = Vec::new();
        for i in 0..6 {
            queue
                .enqueue(&JobPayload::standard(format!("c{i}")), &opts())
                .await
                .unwrap();
            let job = queue.claim("w1").await.unwrap().unwrap();
            queue.complete(job.id).await.unwrap();
            completed_ids.push(job.id);
        }

        let removed = queue.prune(4, 4).await.unwrap();
        assert_eq!(removed, 2);

        // The two oldest completed jobs are gone, the rest remain
        assert!(queue.get(completed_ids[0]).await.unwrap().is_none());
        assert!(queue.get(completed_ids[1]).await.unwrap().is_none());
        assert!(queue.get(completed_ids[5]).await.unwrap().is_some());
    }
}
