use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::{AlignResponse, LlmClient, LlmError, Result};

struct QuotaState {
    backing_off_until: Instant,
    next_delay: Duration,
}

/// Wraps one `LlmClient` with the retry policy from the component contract:
/// `Transient` retries up to `max_retries` with backoff, `AuthFailed` gets a
/// short bounded retry then escalates, `QuotaExceeded` is not retried
/// inline — it arms a cooldown that `is_backing_off` exposes so the
/// orchestrator can stop pulling LLM jobs until it passes.
pub struct LLMClientSet {
    client: Arc<dyn LlmClient>,
    max_retries: u32,
    quota_base_delay: Duration,
    quota_max_delay: Duration,
    quota_backoff_mult: f64,
    quota_state: Mutex<Option<QuotaState>>,
}

const AUTH_RETRY_ATTEMPTS: u32 = 2;

impl LLMClientSet {
    pub fn new(
        client: Arc<dyn LlmClient>,
        max_retries: u32,
        quota_base_delay: Duration,
        quota_max_delay: Duration,
        quota_backoff_mult: f64,
    ) -> Self {
        Self { client, max_retries, quota_base_delay, quota_max_delay, quota_backoff_mult, quota_state: Mutex::new(None) }
    }

    /// Whether quota backoff is currently in effect. The worker should stop
    /// dequeuing LLM jobs while this is `true`.
    pub fn is_backing_off(&self) -> bool {
        match &*self.quota_state.lock().unwrap() {
            Some(state) => Instant::now() < state.backing_off_until,
            None => false,
        }
    }

    fn arm_quota_backoff(&self) {
        let mut state = self.quota_state.lock().unwrap();
        let next_delay = match &*state {
            Some(existing) => {
                let scaled = existing.next_delay.mul_f64(self.quota_backoff_mult);
                scaled.min(self.quota_max_delay)
            }
            None => self.quota_base_delay,
        };
        warn!(provider = self.client.provider(), delay_s = next_delay.as_secs(), "quota exceeded, backing off");
        *state = Some(QuotaState { backing_off_until: Instant::now() + next_delay, next_delay });
    }

    fn clear_quota_backoff(&self) {
        *self.quota_state.lock().unwrap() = None;
    }

    pub async fn align(&self, prompt: &str, schema: &Value) -> Result<AlignResponse> {
        if self.is_backing_off() {
            return Err(LlmError::QuotaExceeded { provider: self.client.provider().to_string() });
        }

        let mut auth_attempts = 0;
        let mut transient_attempts = 0;

        loop {
            match self.client.align(prompt, schema).await {
                Ok(response) => {
                    self.clear_quota_backoff();
                    return Ok(response);
                }
                Err(LlmError::QuotaExceeded { provider }) => {
                    self.arm_quota_backoff();
                    return Err(LlmError::QuotaExceeded { provider });
                }
                Err(LlmError::AuthFailed { provider, message }) => {
                    auth_attempts += 1;
                    if auth_attempts >= AUTH_RETRY_ATTEMPTS {
                        return Err(LlmError::AuthFailed { provider, message });
                    }
                    warn!(%provider, attempt = auth_attempts, "auth failure, retrying briefly");
                }
                Err(err @ (LlmError::Transient { .. } | LlmError::SchemaViolation { .. })) => {
                    transient_attempts += 1;
                    if transient_attempts >= self.max_retries {
                        return Err(err);
                    }
                    info!(provider = self.client.provider(), attempt = transient_attempts, error = %err, "retrying align");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlignResponse, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedClient {
        responses: Mutex<Vec<Result<AlignResponse>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn provider(&self) -> &str {
            "scripted"
        }

        async fn align(&self, _prompt: &str, _schema: &Value) -> Result<AlignResponse> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn ok_response() -> AlignResponse {
        AlignResponse { structured_output: serde_json::json!({}), confidence: Some(0.9), usage: Usage::default() }
    }

    #[tokio::test]
    async fn transient_failure_retries_until_success() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                Err(LlmError::Transient { provider: "scripted".into(), message: "timeout".into() }),
                Ok(ok_response()),
            ]),
        });
        let set = LLMClientSet::new(client, 3, Duration::from_secs(1), Duration::from_secs(4), 2.0);
        let result = set.align("extract", &serde_json::json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn quota_exceeded_arms_backoff_and_is_not_retried_inline() {
        let calls = Arc::new(AtomicU32::new(0));
        struct CountingQuotaClient(Arc<AtomicU32>);
        #[async_trait]
        impl LlmClient for CountingQuotaClient {
            fn provider(&self) -> &str {
                "scripted"
            }
            async fn align(&self, _prompt: &str, _schema: &Value) -> Result<AlignResponse> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::QuotaExceeded { provider: "scripted".into() })
            }
        }

        let client = Arc::new(CountingQuotaClient(calls.clone()));
        let set = LLMClientSet::new(client, 3, Duration::from_secs(1), Duration::from_secs(4), 2.0);

        let result = set.align("extract", &serde_json::json!({})).await;
        assert!(matches!(result, Err(LlmError::QuotaExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "quota exceeded must not be retried inline");
        assert!(set.is_backing_off());
    }

    #[tokio::test]
    async fn auth_failure_escalates_after_bounded_retries() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                Err(LlmError::AuthFailed { provider: "scripted".into(), message: "bad key".into() }),
                Err(LlmError::AuthFailed { provider: "scripted".into(), message: "bad key".into() }),
            ]),
        });
        let set = LLMClientSet::new(client, 3, Duration::from_secs(1), Duration::from_secs(4), 2.0);
        let result = set.align("extract", &serde_json::json!({})).await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
    }
}
