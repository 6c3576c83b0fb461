//! Typed startup configuration for every pipeline binary.
//!
//! All tunables are read once, in [`Config::from_env`], and validated at
//! load time rather than at first use — a malformed threshold should fail
//! the process before it ever dequeues a job, not surface as a confusing
//! runtime error three stages downstream.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{0} must be a valid {1}, got {2:?}")]
    Invalid(&'static str, &'static str, String),

    #[error("{field} must be in {lo}..={hi}, got {value}")]
    OutOfRange { field: &'static str, lo: f64, hi: f64, value: f64 },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    // --- LLM ---
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub llm_timeout_s: u64,
    pub llm_max_retries: u32,
    pub llm_quota_base_delay_s: u64,
    pub llm_quota_max_delay_s: u64,
    pub llm_quota_backoff_mult: f64,

    // --- Alignment ---
    pub align_min_confidence: f64,
    pub align_max_retries: u32,

    // --- Geocoding ---
    pub geocoding_providers: Vec<String>,
    pub geocoding_timeout_s: u64,
    pub geocoding_max_attempts: u32,
    pub geocoding_rate_limit_qps: f64,
    pub geocoding_cache_ttl_s: u64,
    pub geocoding_breaker_threshold: u32,
    pub geocoding_breaker_cooldown_s: u64,

    // --- Validation ---
    pub validation_rejection_threshold: i16,
    pub validation_verified_threshold: i16,
    pub validation_test_patterns: Vec<String>,
    pub validation_placeholder_patterns: Vec<String>,

    // --- Reconciliation ---
    pub org_proximity_threshold: f64,
    pub location_coord_tolerance: f64,
    pub db_max_retries: u32,
    pub advisory_lock_timeout_s: u64,

    // --- Queue ---
    pub queue_visibility_timeout_s: u64,
    pub queue_max_attempts: u32,
    pub result_ttl_s: u64,
    pub queue_highwater: u64,

    // --- Archive / content store ---
    pub archive_root: String,
    pub content_store_enabled: bool,

    // --- Infrastructure ---
    pub database_url: String,
    pub redis_url: String,
}

impl Config {
    /// Load configuration from environment variables, validating every
    /// tunable's shape and bounds before returning.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            llm_provider: env_or("LLM_PROVIDER", "anthropic"),
            llm_model: env_or("LLM_MODEL", "claude-3-5-sonnet-latest"),
            llm_api_key: required_env("LLM_API_KEY")?,
            llm_timeout_s: env_parse_or("LLM_TIMEOUT_S", 30)?,
            llm_max_retries: env_parse_or("LLM_MAX_RETRIES", 3)?,
            llm_quota_base_delay_s: env_parse_or("LLM_QUOTA_BASE_DELAY_S", 3600)?,
            llm_quota_max_delay_s: env_parse_or("LLM_QUOTA_MAX_DELAY_S", 14_400)?,
            llm_quota_backoff_mult: env_parse_or("LLM_QUOTA_BACKOFF_MULT", 2.0)?,

            align_min_confidence: env_parse_or("ALIGN_MIN_CONFIDENCE", 0.85)?,
            align_max_retries: env_parse_or("ALIGN_MAX_RETRIES", 2)?,

            geocoding_providers: env_list_or("GEOCODING_PROVIDERS", &["arcgis", "census", "nominatim"]),
            geocoding_timeout_s: env_parse_or("GEOCODING_TIMEOUT_S", 10)?,
            geocoding_max_attempts: env_parse_or("GEOCODING_MAX_ATTEMPTS", 3)?,
            geocoding_rate_limit_qps: env_parse_or("GEOCODING_RATE_LIMIT_QPS", 5.0)?,
            geocoding_cache_ttl_s: env_parse_or("GEOCODING_CACHE_TTL_S", 86_400)?,
            geocoding_breaker_threshold: env_parse_or("GEOCODING_BREAKER_THRESHOLD", 5)?,
            geocoding_breaker_cooldown_s: env_parse_or("GEOCODING_BREAKER_COOLDOWN_S", 60)?,

            validation_rejection_threshold: env_parse_or("VALIDATION_REJECTION_THRESHOLD", 10)?,
            validation_verified_threshold: env_parse_or("VALIDATION_VERIFIED_THRESHOLD", 70)?,
            validation_test_patterns: env_list_or(
                "VALIDATION_TEST_PATTERNS",
                &["anytown", "unknown", "sample", "test", "example", "lorem ipsum", "asdf", "foo ?bar", "placeholder"],
            ),
            validation_placeholder_patterns: env_list_or(
                "VALIDATION_PLACEHOLDER_PATTERNS",
                &[r"^n/?a$", r"^tbd$", r"^unknown$", r"^123 main st\.?$"],
            ),

            org_proximity_threshold: env_parse_or("ORG_PROXIMITY_THRESHOLD", 0.7)?,
            location_coord_tolerance: env_parse_or("LOCATION_COORD_TOLERANCE", 11.0)?,
            db_max_retries: env_parse_or("DB_MAX_RETRIES", 3)?,
            advisory_lock_timeout_s: env_parse_or("ADVISORY_LOCK_TIMEOUT_S", 5)?,

            queue_visibility_timeout_s: env_parse_or("QUEUE_VISIBILITY_TIMEOUT_S", 300)?,
            queue_max_attempts: env_parse_or("QUEUE_MAX_ATTEMPTS", 3)?,
            result_ttl_s: env_parse_or("RESULT_TTL_S", 30 * 24 * 3600)?,
            queue_highwater: env_parse_or("QUEUE_HIGHWATER", 10_000)?,

            archive_root: env_or("ARCHIVE_ROOT", "./archive"),
            content_store_enabled: env_parse_or("CONTENT_STORE_ENABLED", true)?,

            database_url: required_env("DATABASE_URL")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("align_min_confidence", self.align_min_confidence)?;
        if self.geocoding_providers.is_empty() {
            return Err(ConfigError::Empty("geocoding_providers"));
        }
        check_range("validation_rejection_threshold", self.validation_rejection_threshold as f64, 0.0, 100.0)?;
        check_range("validation_verified_threshold", self.validation_verified_threshold as f64, 0.0, 100.0)?;
        if self.validation_rejection_threshold >= self.validation_verified_threshold {
            return Err(ConfigError::OutOfRange {
                field: "validation_rejection_threshold",
                lo: 0.0,
                hi: (self.validation_verified_threshold - 1) as f64,
                value: self.validation_rejection_threshold as f64,
            });
        }
        if self.llm_quota_max_delay_s < self.llm_quota_base_delay_s {
            return Err(ConfigError::OutOfRange {
                field: "llm_quota_max_delay_s",
                lo: self.llm_quota_base_delay_s as f64,
                hi: f64::INFINITY,
                value: self.llm_quota_max_delay_s as f64,
            });
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_s)
    }

    pub fn geocoding_timeout(&self) -> Duration {
        Duration::from_secs(self.geocoding_timeout_s)
    }

    pub fn queue_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_timeout_s)
    }

    /// Log presence/length of sensitive fields, never their values.
    pub fn log_redacted(&self) {
        let secrets = [("LLM_API_KEY", &self.llm_api_key), ("DATABASE_URL", &self.database_url)];
        for (name, value) in secrets {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!(
            geocoding_providers = ?self.geocoding_providers,
            llm_provider = %self.llm_provider,
            llm_model = %self.llm_model,
            "config loaded"
        );
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    check_range(field, value, 0.0, 1.0)
}

fn check_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value < lo || value > hi {
        Err(ConfigError::OutOfRange { field, lo, hi, value })
    } else {
        Ok(())
    }
}

fn required_env(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, std::any::type_name::<T>(), raw)),
        Err(_) => Ok(default),
    }
}

fn env_list_or(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (key, _) in env::vars() {
            if key.starts_with("LLM_")
                || key.starts_with("ALIGN_")
                || key.starts_with("GEOCODING_")
                || key.starts_with("VALIDATION_")
                || key.starts_with("ORG_")
                || key.starts_with("LOCATION_")
                || key.starts_with("DB_")
                || key.starts_with("ADVISORY_")
                || key.starts_with("QUEUE_")
                || key.starts_with("RESULT_")
                || key == "ARCHIVE_ROOT"
                || key == "CONTENT_STORE_ENABLED"
                || key == "DATABASE_URL"
                || key == "REDIS_URL"
            {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn missing_required_var_is_reported_by_name() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("LLM_API_KEY")));
    }

    #[test]
    #[serial]
    fn defaults_populate_when_optional_vars_absent() {
        clear_env();
        env::set_var("LLM_API_KEY", "key");
        env::set_var("DATABASE_URL", "postgres://localhost/pantry");
        let config = Config::from_env().unwrap();
        assert_eq!(config.validation_rejection_threshold, 10);
        assert_eq!(config.validation_verified_threshold, 70);
        assert_eq!(config.geocoding_providers, vec!["arcgis", "census", "nominatim"]);
        env::remove_var("LLM_API_KEY");
        env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial]
    fn rejects_threshold_ordering_violation() {
        clear_env();
        env::set_var("LLM_API_KEY", "key");
        env::set_var("DATABASE_URL", "postgres://localhost/pantry");
        env::set_var("VALIDATION_REJECTION_THRESHOLD", "80");
        env::set_var("VALIDATION_VERIFIED_THRESHOLD", "70");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "validation_rejection_threshold", .. }));
        env::remove_var("LLM_API_KEY");
        env::remove_var("DATABASE_URL");
        env::remove_var("VALIDATION_REJECTION_THRESHOLD");
        env::remove_var("VALIDATION_VERIFIED_THRESHOLD");
    }
}
