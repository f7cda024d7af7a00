//! Worker pool and maintenance sweeper.
//!
//! Each worker pulls at most one job at a time from the shared queue,
//! heartbeats while the attempt runs, and hands the outcome to the retry
//! policy: a retryable error with attempts remaining goes back to the
//! queue after exponential backoff; anything else is terminal. The sweeper
//! marks heartbeat-expired jobs stalled, requeues them after a grace
//! window, and prunes terminal buckets to their retention bounds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deployd_pipeline::{Orchestrator, ProgressSink};
use deployd_protocol::{JobId, JobRecord, PipelineError};
use deployd_store::JobQueue;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SystemConfig;

/// Backoff before the next attempt: `base * 2^(attempts_made - 1)`,
/// non-decreasing in the attempt count.
pub fn backoff_delay(base_ms: u64, attempts_made: i32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).clamp(0, 16) as u32;
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

/// Progress writer for one active job; every checkpoint also refreshes the
/// heartbeat.
struct QueueProgress {
    queue: JobQueue,
    job_id: JobId,
}

#[async_trait]
impl ProgressSink for QueueProgress {
    async fn progress(&self, pct: u8) {
        if let Err(err) = self.queue.set_progress(self.job_id, pct).await {
            warn!(job_id = %self.job_id, %err, "progress checkpoint not recorded");
        }
    }
}

struct Worker {
    id: String,
    queue: JobQueue,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    backoff_base_ms: u64,
}

impl Worker {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(worker_id = %self.id, "worker started");
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = poll.tick() => {}
            }

            // Drain eligible jobs before sleeping again
            loop {
                match self.queue.claim(&self.id).await {
                    Ok(Some(job)) => self.process(job).await,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(worker_id = %self.id, %err, "claim failed");
                        break;
                    }
                }
                if shutdown.try_recv().is_ok() {
                    info!(worker_id = %self.id, "worker stopping");
                    return;
                }
            }
        }
        info!(worker_id = %self.id, "worker stopped");
    }

    async fn process(&self, job: JobRecord) {
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            artifact_id = %job.payload.artifact_id,
            kind = %job.payload.kind,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "processing job"
        );

        let heartbeat = self.spawn_heartbeat(job.id);
        let sink = QueueProgress {
            queue: self.queue.clone(),
            job_id: job.id,
        };
        let result = self.orchestrator.run_attempt(&job.payload, &sink).await;
        heartbeat.abort();

        match result {
            Ok(receipt) => {
                if let Err(err) = self.queue.complete(job.id).await {
                    error!(job_id = %job.id, %err, "completed attempt could not be recorded");
                }
                info!(
                    job_id = %job.id,
                    artifact_id = %job.payload.artifact_id,
                    address = %receipt.address,
                    "job succeeded"
                );
            }
            Err(err) => self.handle_failure(&job, err).await,
        }
    }

    /// The retry policy. Attempt errors re-enter the queue with backoff;
    /// validation-class errors never do.
    async fn handle_failure(&self, job: &JobRecord, err: PipelineError) {
        if err.is_retryable() && job.attempts_remaining() {
            let delay = backoff_delay(self.backoff_base_ms, job.attempts);
            info!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                %err,
                "attempt failed; scheduling retry with exponential backoff"
            );
            if let Err(retry_err) = self.queue.schedule_retry(job.id, &err.to_string(), delay).await {
                error!(job_id = %job.id, %retry_err, "retry could not be scheduled");
            }
        } else {
            warn!(
                job_id = %job.id,
                artifact_id = %job.payload.artifact_id,
                attempt = job.attempts,
                retryable = err.is_retryable(),
                %err,
                "job failed terminally"
            );
            if let Err(fail_err) = self.queue.fail(job.id, &err.to_string()).await {
                error!(job_id = %job.id, %fail_err, "terminal failure could not be recorded");
            }
        }
    }

    fn spawn_heartbeat(&self, job_id: JobId) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(err) = queue.heartbeat(job_id).await {
                    warn!(job_id = %job_id, %err, "heartbeat not recorded");
                }
            }
        })
    }
}

async fn sweep(queue: &JobQueue, config: &SystemConfig) {
    let timeout = Duration::from_secs(config.heartbeat_timeout_secs);

    match queue.mark_stalled(timeout).await {
        Ok(stalled) if !stalled.is_empty() => {
            warn!(count = stalled.len(), "jobs marked stalled");
        }
        Ok(_) => {}
        Err(err) => warn!(%err, "stall sweep failed"),
    }

    // Requeue only after a second full heartbeat window: a worker that is
    // slow mid-broadcast must not be raced by a replacement attempt
    if let Err(err) = queue.requeue_stalled(timeout).await {
        warn!(%err, "stalled requeue failed");
    }

    if let Err(err) = queue
        .prune(config.retain_completed, config.retain_failed)
        .await
    {
        warn!(%err, "retention prune failed");
    }
}

/// Running pool handle: workers plus the sweeper, stopped together.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: broadcast::Sender<()>,
}

impl WorkerPool {
    /// Signal shutdown and wait for every task to finish its current job.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

/// Spawn the configured workers and the sweeper over a shared queue.
pub fn spawn_workers(
    config: &SystemConfig,
    queue: JobQueue,
    orchestrator: Arc<Orchestrator>,
) -> WorkerPool {
    let (shutdown, _) = broadcast::channel(1);
    let mut handles = Vec::with_capacity(config.workers + 1);

    let heartbeat_interval =
        Duration::from_secs(config.heartbeat_timeout_secs.max(3) / 3);

    for n in 0..config.workers.max(1) {
        let worker = Worker {
            id: format!("worker-{n}"),
            queue: queue.clone(),
            orchestrator: orchestrator.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            heartbeat_interval,
            backoff_base_ms: config.backoff_base_ms,
        };
        handles.push(tokio::spawn(worker.run(shutdown.subscribe())));
    }

    // Sweeper
    {
        let queue = queue.clone();
        let config = config.clone();
        let mut rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config.sweep_interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = ticker.tick() => sweep(&queue, &config).await,
                }
            }
        }));
    }

    info!(workers = config.workers.max(1), "worker pool started");
    WorkerPool { handles, shutdown }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(2_000, 1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(2_000, 2), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(2_000, 3), Duration::from_millis(8_000));
    }

    #[test]
    fn backoff_is_non_decreasing_and_bounded() {
        let mut last = Duration::ZERO;
        for attempt in 0..64 {
            let delay = backoff_delay(2_000, attempt);
            assert!(delay >= last, "attempt {attempt}: {delay:?} < {last:?}");
            last = delay;
        }
    }
}
