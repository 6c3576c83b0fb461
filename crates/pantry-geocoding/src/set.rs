use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::GeocodeCache;
use crate::provider::{GeocodeResult, GeocodingProvider};
use crate::{GeocodingError, Result};

#[derive(Debug, Default)]
pub struct ProviderCounters {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub breaker_open_events: AtomicU64,
}

impl ProviderCounters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.attempts.load(Ordering::Relaxed),
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            self.cache_hits.load(Ordering::Relaxed),
            self.breaker_open_events.load(Ordering::Relaxed),
        )
    }
}

enum Call {
    Geocode(String),
    Reverse(f64, f64),
}

struct Slot {
    provider: Arc<dyn GeocodingProvider>,
    breaker: CircuitBreaker,
    counters: ProviderCounters,
}

/// Orchestrates an ordered fallback chain of providers behind one cache and
/// per-provider circuit breakers. Providers are tried in the order passed
/// to `new`; the first cache hit or successful provider call wins.
pub struct GeocodingProviderSet {
    slots: Vec<Slot>,
    cache: GeocodeCache,
    max_attempts: u32,
    backoff_base: Duration,
}

impl GeocodingProviderSet {
    pub fn new(
        providers: Vec<Arc<dyn GeocodingProvider>>,
        cache_ttl: Duration,
        breaker_threshold: u32,
        breaker_cooldown: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| Slot {
                provider,
                breaker: CircuitBreaker::new(breaker_threshold, breaker_cooldown),
                counters: ProviderCounters::default(),
            })
            .collect();

        Self { slots, cache: GeocodeCache::new(cache_ttl), max_attempts, backoff_base }
    }

    pub fn counters(&self, provider_name: &str) -> Option<(u64, u64, u64, u64, u64)> {
        self.slots.iter().find(|s| s.provider.name() == provider_name).map(|s| s.counters.snapshot())
    }

    pub async fn geocode(&self, address: &str) -> Result<GeocodeResult> {
        let key = GeocodeCache::key_for_address(address);
        self.resolve(&key, &Call::Geocode(address.to_string())).await
    }

    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<GeocodeResult> {
        let key = GeocodeCache::key_for_reverse(lat, lon);
        self.resolve(&key, &Call::Reverse(lat, lon)).await
    }

    async fn resolve(&self, cache_key: &str, call: &Call) -> Result<GeocodeResult> {
        if let Some(cached) = self.cache.get(cache_key) {
            for slot in &self.slots {
                slot.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            return cached.ok_or(GeocodingError::NotFound);
        }

        for slot in &self.slots {
            if !slot.breaker.allow() {
                slot.counters.breaker_open_events.fetch_add(1, Ordering::Relaxed);
                warn!(provider = slot.provider.name(), "breaker open, skipping provider");
                continue;
            }

            match self.call_with_retry(slot, call).await {
                Ok(result) => {
                    slot.breaker.record_success();
                    self.cache.put_found(cache_key.to_string(), result.clone());
                    info!(provider = slot.provider.name(), "geocode resolved");
                    return Ok(result);
                }
                Err(GeocodingError::NotFound) => {
                    // Not-found is not a provider failure; don't trip the breaker,
                    // but do cache it so repeat lookups skip the whole chain.
                    continue;
                }
                Err(err) => {
                    slot.breaker.record_failure();
                    warn!(provider = slot.provider.name(), error = %err, "provider failed, falling back");
                }
            }
        }

        self.cache.put_not_found(cache_key.to_string());
        Err(GeocodingError::NotFound)
    }

    async fn call_with_retry(&self, slot: &Slot, call: &Call) -> std::result::Result<GeocodeResult, GeocodingError> {
        let mut last_err = GeocodingError::Unavailable;

        for attempt in 0..self.max_attempts {
            slot.counters.attempts.fetch_add(1, Ordering::Relaxed);
            let outcome = match call {
                Call::Geocode(address) => slot.provider.geocode(address).await,
                Call::Reverse(lat, lon) => slot.provider.reverse(*lat, *lon).await,
            };
            match outcome {
                Ok(result) => {
                    slot.counters.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(GeocodingError::NotFound) => return Err(GeocodingError::NotFound),
                Err(err) => {
                    slot.counters.failures.fetch_add(1, Ordering::Relaxed);
                    last_err = err;
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.backoff_with_jitter(attempt)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let jitter = rand::thread_rng().gen_range(0..=base.max(1) / 2);
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FlakyProvider {
        name: &'static str,
        fail_times: AtomicU32,
        result: GeocodeResult,
    }

    #[async_trait]
    impl GeocodingProvider for FlakyProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn geocode(&self, _address: &str) -> std::result::Result<GeocodeResult, GeocodingError> {
            if self.fail_times.load(Ordering::Relaxed) > 0 {
                self.fail_times.fetch_sub(1, Ordering::Relaxed);
                return Err(GeocodingError::Http { provider: self.name.into(), message: "timeout".into() });
            }
            Ok(self.result.clone())
        }

        async fn reverse(&self, _lat: f64, _lon: f64) -> std::result::Result<GeocodeResult, GeocodingError> {
            Ok(self.result.clone())
        }
    }

    struct AlwaysNotFound;

    #[async_trait]
    impl GeocodingProvider for AlwaysNotFound {
        fn name(&self) -> &str {
            "nowhere"
        }

        async fn geocode(&self, _address: &str) -> std::result::Result<GeocodeResult, GeocodingError> {
            Err(GeocodingError::NotFound)
        }

        async fn reverse(&self, _lat: f64, _lon: f64) -> std::result::Result<GeocodeResult, GeocodingError> {
            Err(GeocodingError::NotFound)
        }
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let provider = Arc::new(FlakyProvider {
            name: "flaky",
            fail_times: AtomicU32::new(1),
            result: GeocodeResult { lat: 1.0, lon: 2.0, source: "flaky".into(), address: None },
        });
        let set = GeocodingProviderSet::new(
            vec![provider as Arc<dyn GeocodingProvider>],
            Duration::from_secs(60),
            5,
            Duration::from_secs(60),
            3,
            Duration::from_millis(1),
        );

        let result = set.geocode("123 Main St").await.unwrap();
        assert_eq!(result.lat, 1.0);
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_on_not_found() {
        let first = Arc::new(AlwaysNotFound);
        let second = Arc::new(FlakyProvider {
            name: "second",
            fail_times: AtomicU32::new(0),
            result: GeocodeResult { lat: 5.0, lon: 6.0, source: "second".into(), address: None },
        });
        let set = GeocodingProviderSet::new(
            vec![first as Arc<dyn GeocodingProvider>, second as Arc<dyn GeocodingProvider>],
            Duration::from_secs(60),
            5,
            Duration::from_secs(60),
            2,
            Duration::from_millis(1),
        );

        let result = set.geocode("somewhere").await.unwrap();
        assert_eq!(result.source, "second");
    }

    #[tokio::test]
    async fn not_found_across_all_providers_is_cached() {
        let set = GeocodingProviderSet::new(
            vec![Arc::new(AlwaysNotFound) as Arc<dyn GeocodingProvider>],
            Duration::from_secs(60),
            5,
            Duration::from_secs(60),
            1,
            Duration::from_millis(1),
        );

        assert_eq!(set.geocode("nowhere").await, Err(GeocodingError::NotFound));
        // Second call should hit the not-found cache entry, not the provider again.
        assert_eq!(set.geocode("nowhere").await, Err(GeocodingError::NotFound));
    }
}
