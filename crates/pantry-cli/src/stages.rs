//! The four [`StageHandler`] implementations that turn a dequeued [`Lease`]
//! into pipeline progress. Grounded on the teacher's `ScrapeWorkflow`/
//! `ExtractWorkflow` split (`rootsignal-domains/src/scraping/restate.rs`,
//! `.../extraction/restate.rs`): each stage owns exactly one piece of
//! domain logic and hands its output to the next stage's queue rather than
//! calling it directly.

use std::sync::Arc;

use chrono::Utc;
use pantry_aligner::HsdsAligner;
use pantry_domain::{HsdsPayload, Job, JobResult, JobStatus, JobType};
use pantry_queue::{Lease, QueueBus};
use pantry_reconciler::Reconciler;
use pantry_validator::ValidatorEnricher;
use pantry_worker::{StageHandler, StageOutcome};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmJobPayload {
    pub content: String,
    pub source_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatorJobPayload {
    pub payload: HsdsPayload,
    pub confidence: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcilerJobPayload {
    pub payload: HsdsPayload,
}

fn decode<T: for<'de> Deserialize<'de>>(job: &Job) -> Result<T, String> {
    serde_json::from_value(job.payload.clone()).map_err(|e| format!("malformed job payload: {e}"))
}

/// Aligns raw scraped content into an HSDS draft via the LLM, then hands the
/// draft to the validator queue as a child job.
pub struct LlmStage {
    aligner: HsdsAligner,
    queue: Arc<QueueBus>,
}

impl LlmStage {
    pub fn new(aligner: HsdsAligner, queue: Arc<QueueBus>) -> Self {
        Self { aligner, queue }
    }
}

#[async_trait::async_trait]
impl StageHandler for LlmStage {
    fn queue_name(&self) -> &str {
        JobType::Llm.queue_name()
    }

    async fn handle(&self, lease: &Lease) -> StageOutcome {
        let payload: LlmJobPayload = match decode(&lease.job) {
            Ok(p) => p,
            Err(err) => return StageOutcome::Nack(err),
        };

        let outcome = match self.aligner.align(&payload.content, payload.source_url.as_deref()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job_id = %lease.job.id, %err, "alignment failed");
                return StageOutcome::Nack(err.to_string());
            }
        };

        let child_payload = ValidatorJobPayload { payload: outcome.payload, confidence: outcome.confidence };
        let child = lease.job.child(JobType::Validate, serde_json::json!(child_payload));
        if let Err(err) = self.queue.enqueue(JobType::Validate.queue_name(), &child, lease.job.metadata.priority).await {
            return StageOutcome::Nack(err.to_string());
        }

        StageOutcome::Ack
    }
}

/// Geocodes and scores the HSDS draft, then fans its output to both the
/// reconciler queue (for canonicalization) and the recorder queue (for
/// archival of the validated result) — the only fan-out point in the
/// pipeline, so a job is archived exactly once per validation pass.
pub struct ValidatorStage {
    enricher: ValidatorEnricher,
    queue: Arc<QueueBus>,
}

impl ValidatorStage {
    pub fn new(enricher: ValidatorEnricher, queue: Arc<QueueBus>) -> Self {
        Self { enricher, queue }
    }
}

#[async_trait::async_trait]
impl StageHandler for ValidatorStage {
    fn queue_name(&self) -> &str {
        JobType::Validate.queue_name()
    }

    async fn handle(&self, lease: &Lease) -> StageOutcome {
        let mut payload: ValidatorJobPayload = match decode(&lease.job) {
            Ok(p) => p,
            Err(err) => return StageOutcome::Nack(err),
        };

        let started = std::time::Instant::now();
        self.enricher.run(&mut payload.payload).await;

        let result = JobResult {
            job_id: lease.job.id,
            status: JobStatus::Succeeded,
            output: serde_json::json!(payload.payload),
            error: None,
            produced_at: Utc::now(),
            latency_ms: started.elapsed().as_millis() as u64,
            provider: None,
            confidence: Some(payload.confidence),
        };
        if let Err(err) = self.queue.complete(&result).await {
            return StageOutcome::Nack(err.to_string());
        }

        let reconciler_child =
            lease.job.child(JobType::Reconcile, serde_json::json!(ReconcilerJobPayload { payload: payload.payload.clone() }));
        if let Err(err) =
            self.queue.enqueue(JobType::Reconcile.queue_name(), &reconciler_child, lease.job.metadata.priority).await
        {
            return StageOutcome::Nack(err.to_string());
        }

        let recorder_child = lease.job.child(JobType::Record, serde_json::json!(result));
        if let Err(err) = self.queue.enqueue(JobType::Record.queue_name(), &recorder_child, lease.job.metadata.priority).await
        {
            return StageOutcome::Nack(err.to_string());
        }

        StageOutcome::Ack
    }
}

/// Matches and merges the validated draft into canonical Organization/
/// Location/Service rows. Terminal for the entity graph: it has no further
/// queue to enqueue to.
pub struct ReconcilerStage {
    reconciler: Reconciler,
}

impl ReconcilerStage {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait::async_trait]
impl StageHandler for ReconcilerStage {
    fn queue_name(&self) -> &str {
        JobType::Reconcile.queue_name()
    }

    async fn handle(&self, lease: &Lease) -> StageOutcome {
        let payload: ReconcilerJobPayload = match decode(&lease.job) {
            Ok(p) => p,
            Err(err) => return StageOutcome::Nack(err),
        };

        match self.reconciler.reconcile(&payload.payload, &lease.job.metadata.scraper_id).await {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %lease.job.id,
                    organization_id = ?outcome.organization_id,
                    locations = outcome.location_ids.len(),
                    services = outcome.service_ids.len(),
                    "reconciled"
                );
                StageOutcome::Ack
            }
            // Malformed payloads will never succeed on retry; route them
            // straight to the DLQ instead of burning retry attempts on them.
            Err(err @ pantry_reconciler::ReconcilerError::Malformed(_)) => StageOutcome::Dlq(err.to_string()),
            Err(err) => StageOutcome::Nack(err.to_string()),
        }
    }
}

/// Archives a completed job's result to the filesystem. Terminal: nothing
/// downstream consumes a recorded result.
pub struct RecorderStage {
    recorder: pantry_recorder::Recorder,
}

impl RecorderStage {
    pub fn new(recorder: pantry_recorder::Recorder) -> Self {
        Self { recorder }
    }
}

#[async_trait::async_trait]
impl StageHandler for RecorderStage {
    fn queue_name(&self) -> &str {
        JobType::Record.queue_name()
    }

    async fn handle(&self, lease: &Lease) -> StageOutcome {
        let result: JobResult = match decode(&lease.job) {
            Ok(r) => r,
            Err(err) => return StageOutcome::Nack(err),
        };

        match self.recorder.record(&result, &lease.job.metadata.scraper_id).await {
            Ok(_) => StageOutcome::Ack,
            Err(err) => StageOutcome::Nack(err.to_string()),
        }
    }
}
