//! Generic stage runtime shared by every pipeline worker, grounded on the
//! teacher's deps-container engine shape (`rootsignal-scout/src/core/engine.rs`'s
//! `ScoutEngineDeps`) generalized from one event-driven pipeline engine into
//! a queue-agnostic dequeue/dispatch/backpressure loop: a `Worker` is bound
//! to exactly one queue and one [`StageHandler`], same as every concrete
//! stage (LLM, validator, reconciler, recorder) in this pipeline.

pub mod health;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pantry_queue::{Lease, QueueBus, QueueError};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

pub use health::Health;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// What a stage wants done with the job it just processed.
pub enum StageOutcome {
    Ack,
    /// Retry-eligible failure; requeued up to the queue's `max_attempts`
    /// before landing in the DLQ.
    Nack(String),
    /// Non-retryable failure (malformed payload, schema violation); routed
    /// straight to the DLQ without spending retry attempts on it.
    Dlq(String),
}

/// One pipeline stage's processing function. `Worker` owns the dequeue
/// loop, retry/backpressure/shutdown mechanics; a `StageHandler` owns only
/// the domain logic for turning one job into an outcome.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn queue_name(&self) -> &str;
    async fn handle(&self, lease: &Lease) -> StageOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Max jobs processed concurrently by this worker instance.
    pub concurrency: usize,
    pub visibility_timeout: Duration,
    /// How long to wait for in-flight jobs to finish during shutdown before
    /// aborting them and nacking their leases.
    pub graceful_timeout: Duration,
    /// Downstream queue depth at or above which dequeuing pauses.
    pub highwater: u64,
    /// How long to idle between empty dequeues or while backpressured.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            visibility_timeout: Duration::from_secs(300),
            graceful_timeout: Duration::from_secs(30),
            highwater: 10_000,
            poll_interval: Duration::from_millis(200),
        }
    }
}

struct InFlight {
    lease: Lease,
    abort: tokio::task::AbortHandle,
}

/// Dequeues from `handler.queue_name()`, dispatches each job to `handler` in
/// its own task, and ack/nacks based on the returned [`StageOutcome`].
pub struct Worker<H: StageHandler + 'static> {
    queue: Arc<QueueBus>,
    handler: Arc<H>,
    config: WorkerConfig,
    /// Queues this worker's output feeds; checked for backpressure before
    /// every dequeue. Empty for a terminal stage (reconciler, recorder).
    downstream_queues: Vec<String>,
    health: Health,
}

impl<H: StageHandler + 'static> Worker<H> {
    pub fn new(queue: Arc<QueueBus>, handler: Arc<H>, config: WorkerConfig, downstream_queues: Vec<String>) -> Self {
        Self { queue, handler, config, downstream_queues, health: Health::new() }
    }

    pub fn health(&self) -> Health {
        self.health.clone()
    }

    /// Run until `shutdown` reports `true`, then drain in-flight jobs up to
    /// `graceful_timeout` before nacking whatever remains.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let in_flight: Arc<Mutex<HashMap<Uuid, InFlight>>> = Arc::new(Mutex::new(HashMap::new()));
        self.health.set_ready(true);

        loop {
            self.health.heartbeat();
            if *shutdown.borrow() {
                break;
            }

            let backpressured = match self.backpressured().await {
                Ok(b) => b,
                Err(err) => {
                    tracing::warn!(queue = self.handler.queue_name(), %err, "queue unreachable, reporting not ready");
                    self.health.set_ready(false);
                    if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };
            if backpressured {
                tracing::debug!(queue = self.handler.queue_name(), "backpressured, pausing dequeue");
                self.health.set_ready(false);
                if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                    break;
                }
                continue;
            }
            self.health.set_ready(true);

            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                    break;
                }
                continue;
            };

            let lease = match self.queue.dequeue(self.handler.queue_name(), self.config.visibility_timeout).await {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    drop(permit);
                    if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    tracing::warn!(queue = self.handler.queue_name(), %err, "dequeue failed, reporting not ready");
                    self.health.set_ready(false);
                    drop(permit);
                    if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };

            let job_id = lease.job.id;
            let handler = self.handler.clone();
            let queue = self.queue.clone();
            let in_flight_done = in_flight.clone();
            let lease_for_task = lease.clone();

            let join = tokio::spawn(async move {
                let outcome = handler.handle(&lease_for_task).await;
                let ack_result = match outcome {
                    StageOutcome::Ack => queue.ack(&lease_for_task).await,
                    StageOutcome::Nack(reason) => queue.nack(&lease_for_task, &reason).await,
                    StageOutcome::Dlq(reason) => queue.dead_letter(&lease_for_task, &reason).await,
                };
                if let Err(err) = ack_result {
                    tracing::warn!(%job_id, %err, "failed to finalize job lease");
                }
                in_flight_done.lock().unwrap().remove(&job_id);
                drop(permit);
            });

            in_flight.lock().unwrap().insert(job_id, InFlight { lease, abort: join.abort_handle() });
        }

        self.health.set_ready(false);
        tracing::info!(queue = self.handler.queue_name(), "stopped accepting new jobs, draining in-flight");
        self.drain(in_flight).await;
        Ok(())
    }

    async fn drain(&self, in_flight: Arc<Mutex<HashMap<Uuid, InFlight>>>) {
        let deadline = tokio::time::Instant::now() + self.config.graceful_timeout;
        while tokio::time::Instant::now() < deadline && !in_flight.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining: Vec<InFlight> = in_flight.lock().unwrap().drain().map(|(_, v)| v).collect();
        for entry in remaining {
            entry.abort.abort();
            if let Err(err) = self.queue.nack(&entry.lease, "graceful shutdown timed out").await {
                tracing::warn!(%err, "failed to nack in-flight lease on shutdown");
            }
        }
    }

    async fn backpressured(&self) -> Result<bool> {
        for queue_name in &self.downstream_queues {
            if self.queue.depth(queue_name).await? >= self.config.highwater {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_domain::{Job, JobMetadata, JobType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct CountingHandler {
        queue: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StageHandler for CountingHandler {
        fn queue_name(&self) -> &str {
            self.queue
        }

        async fn handle(&self, _lease: &Lease) -> StageOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            StageOutcome::Ack
        }
    }

    fn job() -> Job {
        Job::new(
            JobType::Llm,
            serde_json::json!({"content_ref": "abc"}),
            JobMetadata {
                scraper_id: "scraper_a".to_string(),
                source_url: None,
                priority: 5,
                attempts: 0,
                created_at: chrono::Utc::now(),
            },
        )
    }

    #[test]
    fn worker_config_default_has_sane_bounds() {
        let config = WorkerConfig::default();
        assert!(config.concurrency > 0);
        assert!(config.highwater > 0);
    }

    #[tokio::test]
    async fn health_reports_not_ready_until_run_starts() {
        let health = Health::new();
        assert!(!health.is_ready());
        health.set_ready(true);
        assert!(health.is_ready());
    }

    #[tokio::test]
    async fn health_liveness_reflects_recent_heartbeat() {
        let health = Health::new();
        health.heartbeat();
        assert!(health.is_live(StdDuration::from_secs(5)));
    }

    #[test]
    fn job_helper_builds_an_llm_job() {
        let j = job();
        assert_eq!(j.job_type, JobType::Llm);
    }
}
