//! Turns raw scraped content into an HSDS-shaped payload.
//!
//! Grounded on the teacher's AI-driven extraction activity
//! (`taproot-domains/src/extraction/activities/extract.rs`): build a
//! schema-referencing prompt, invoke the LLM with structured-output
//! enforcement, and persist a confidence score alongside the result. Unlike
//! the teacher (which accepts whatever the model returns at a fixed
//! confidence), this generalizes to a genuine multi-signal score and a
//! corrective retry loop, since HSDS alignment tolerates less ambiguity
//! than a community-signal extraction does.

mod coherence;
mod confidence;
mod prompt;

use std::sync::Arc;

use pantry_domain::HsdsPayload;
use pantry_llm::{LLMClientSet, LlmError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone)]
pub enum AlignError {
    #[error("llm error during alignment: {0}")]
    Llm(#[from] LlmError),
}

pub type Result<T> = std::result::Result<T, AlignError>;

#[derive(Debug, Clone)]
pub struct AlignOutcome {
    pub payload: HsdsPayload,
    pub confidence: f32,
    /// Set when every retry stayed below `align_min_confidence`. The
    /// payload is still returned — downstream stages tag it `needs_review`
    /// rather than discarding it.
    pub needs_review: bool,
}

pub struct HsdsAligner {
    llm: Arc<LLMClientSet>,
    min_confidence: f32,
    max_retries: u32,
}

impl HsdsAligner {
    pub fn new(llm: Arc<LLMClientSet>, min_confidence: f32, max_retries: u32) -> Self {
        Self { llm, min_confidence, max_retries }
    }

    pub async fn align(&self, raw_content: &str, source_url: Option<&str>) -> Result<AlignOutcome> {
        let schema = prompt::hsds_schema();
        let mut corrective_context: Option<Vec<String>> = None;

        for attempt in 0..=self.max_retries {
            let user_prompt = prompt::build_prompt(raw_content, source_url, corrective_context.as_deref());
            let response = self.llm.align(&user_prompt, &schema).await?;

            let (payload, mut issues) = match serde_json::from_value::<HsdsPayload>(response.structured_output) {
                Ok(payload) => {
                    let issues = coherence::check(&payload);
                    (payload, issues)
                }
                Err(err) => (HsdsPayload::default(), vec![format!("response did not match the HSDS schema: {err}")]),
            };

            let score = confidence::score(&payload, response.confidence, issues.len());
            info!(attempt, score, issue_count = issues.len(), "alignment attempt scored");

            if score >= self.min_confidence {
                return Ok(AlignOutcome { payload, confidence: score, needs_review: false });
            }

            if attempt == self.max_retries {
                warn!(score, min_confidence = self.min_confidence, "alignment exhausted retries below threshold, flagging needs_review");
                return Ok(AlignOutcome { payload, confidence: score, needs_review: true });
            }

            issues.push(format!("overall confidence {score:.2} was below the required {:.2}", self.min_confidence));
            corrective_context = Some(issues);
        }

        unreachable!("loop always returns on its final iteration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pantry_llm::{AlignResponse, LlmClient, Usage};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedLlm {
        responses: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn provider(&self) -> &str {
            "scripted"
        }

        async fn align(&self, _prompt: &str, _schema: &serde_json::Value) -> pantry_llm::Result<AlignResponse> {
            let structured_output = self.responses.lock().unwrap().remove(0);
            Ok(AlignResponse { structured_output, confidence: Some(0.92), usage: Usage::default() })
        }
    }

    fn aligner(responses: Vec<serde_json::Value>) -> HsdsAligner {
        let llm = Arc::new(ScriptedLlm { responses: Mutex::new(responses) });
        let set = Arc::new(LLMClientSet::new(llm, 3, Duration::from_secs(1), Duration::from_secs(4), 2.0));
        HsdsAligner::new(set, 0.85, 2)
    }

    #[tokio::test]
    async fn well_formed_payload_passes_on_first_attempt() {
        let aligner = aligner(vec![serde_json::json!({
            "organization": {"name": "Helping Hands", "description": "A food shelf", "url": "https://example.org"},
            "locations": [{"latitude": 44.96, "longitude": -93.27, "address": "123 Main St"}],
            "services": [{"name": "Food Shelf", "description": "Weekly groceries", "status": "active", "location_index": 0}]
        })]);

        let outcome = aligner.align("raw content", Some("https://example.org")).await.unwrap();
        assert!(!outcome.needs_review);
        assert!(outcome.confidence >= 0.85);
    }

    #[tokio::test]
    async fn persistent_low_confidence_flags_needs_review_without_erroring() {
        let sparse = serde_json::json!({"organization": null, "locations": [], "services": []});
        let aligner = aligner(vec![sparse.clone(), sparse.clone(), sparse]);

        let outcome = aligner.align("raw content", None).await.unwrap();
        assert!(outcome.needs_review);
    }
}
