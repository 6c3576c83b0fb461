use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::provider::GeocodeResult;

#[derive(Clone)]
enum Cached {
    Found(GeocodeResult),
    NotFound,
}

struct Entry {
    value: Cached,
    observed_at: Instant,
}

/// In-memory TTL cache keyed by `sha256(normalized_address | "lat,lon" |
/// "reverse")`. A not-found result is cached for the same TTL as a hit, so
/// a persistently-ungeocodable address doesn't retry every job.
pub struct GeocodeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl GeocodeCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn key_for_address(address: &str) -> String {
        let normalized = address.trim().to_lowercase();
        Self::digest(&format!("{normalized}|geocode"))
    }

    pub fn key_for_reverse(lat: f64, lon: f64) -> String {
        Self::digest(&format!("{lat:.6},{lon:.6}|reverse"))
    }

    fn digest(input: &str) -> String {
        let hash = Sha256::digest(input.as_bytes());
        hash.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// `Some(Some(result))` = cached hit, `Some(None)` = cached not-found,
    /// `None` = no cache entry (or expired).
    pub fn get(&self, key: &str) -> Option<Option<GeocodeResult>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.observed_at.elapsed() < self.ttl => Some(match &entry.value {
                Cached::Found(result) => Some(result.clone()),
                Cached::NotFound => None,
            }),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put_found(&self, key: String, result: GeocodeResult) {
        self.entries.lock().unwrap().insert(key, Entry { value: Cached::Found(result), observed_at: Instant::now() });
    }

    pub fn put_not_found(&self, key: String) {
        self.entries.lock().unwrap().insert(key, Entry { value: Cached::NotFound, observed_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GeocodeResult;

    #[test]
    fn not_found_sentinel_is_cacheable_and_distinguishable_from_miss() {
        let cache = GeocodeCache::new(Duration::from_secs(60));
        let key = GeocodeCache::key_for_address("123 Nowhere St");
        assert_eq!(cache.get(&key), None);

        cache.put_not_found(key.clone());
        assert_eq!(cache.get(&key), Some(None));
    }

    #[test]
    fn found_entry_expires_after_ttl() {
        let cache = GeocodeCache::new(Duration::from_millis(1));
        let key = GeocodeCache::key_for_address("1600 Pennsylvania Ave");
        cache.put_found(
            key.clone(),
            GeocodeResult { lat: 38.897, lon: -77.036, source: "census".into(), address: None },
        );
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&key), None);
    }
}
