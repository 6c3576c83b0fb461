use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Verified,
    NeedsReview,
    Rejected,
}

/// A single rule outcome recorded against an entity during validation.
/// `validation_notes` on the entity is a `Vec<ValidationNote>` rather than a
/// free-form string so the Reconciler's rejection gate can inspect reasons
/// (e.g. "zero coordinates", "test-data pattern") programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationNote {
    pub rule: String,
    pub delta: i16,
    pub reason: String,
}

impl ValidationNote {
    pub fn new(rule: impl Into<String>, delta: i16, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            delta,
            reason: reason.into(),
        }
    }
}
