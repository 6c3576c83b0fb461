use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A content-addressable dedup entry. Hash is the canonical identity;
/// never mutated or deleted by the core once created.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContentEntry {
    /// Hex-encoded SHA-256 of the canonicalized payload bytes.
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub first_scraper_id: String,
    pub job_id: Option<Uuid>,
    /// Opaque reference to where the raw payload bytes live (blob store key).
    pub payload_ref: String,
}
