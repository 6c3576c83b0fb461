use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Organization,
    Location,
    Service,
}

/// Full-snapshot version history for a canonical record. Never mutated;
/// `version_num` is monotone per `record_id` and version 1 is the creation
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecordVersion {
    pub id: Uuid,
    pub record_id: Uuid,
    pub record_type: RecordType,
    pub version_num: i32,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}
