use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Llm,
    Validate,
    Reconcile,
    Record,
}

impl JobType {
    /// The `QueueBus` queue name this job type is routed through.
    pub fn queue_name(self) -> &'static str {
        match self {
            JobType::Llm => "llm",
            JobType::Validate => "validator",
            JobType::Reconcile => "reconciler",
            JobType::Record => "recorder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Rejected,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Rejected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub scraper_id: String,
    pub source_url: Option<String>,
    /// 0 (lowest) .. 9 (highest).
    pub priority: u8,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub metadata: JobMetadata,
    pub parent_id: Option<Uuid>,
}

impl Job {
    pub fn new(job_type: JobType, payload: serde_json::Value, metadata: JobMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            metadata,
            parent_id: None,
        }
    }

    pub fn child(&self, job_type: JobType, payload: serde_json::Value) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.attempts = 0;
        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            metadata,
            parent_id: Some(self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub produced_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub provider: Option<String>,
    pub confidence: Option<f32>,
}
