//! Multi-provider geocoding with an ordered fallback chain, TTL cache,
//! per-provider circuit breaker, and retry-with-jitter on transient
//! failure.
//!
//! Grounded on the teacher's HTTP-client-with-retry shape (`ai-client`'s
//! `claude::client::ClaudeClient`: a thin `reqwest::Client` wrapper that
//! builds headers once and maps non-2xx into a typed error) and its
//! distance/coordinate helpers (`rootsignal-domains/src/geo.rs`, copied
//! here near-verbatim since the math itself needs no domain change).

mod breaker;
mod cache;
mod geo;
mod provider;
mod set;

pub use breaker::CircuitBreaker;
pub use cache::GeocodeCache;
pub use geo::{coarsen_coords, haversine_distance_meters, haversine_distance_miles, DistanceUnit};
pub use provider::{GeocodeResult, GeocodingProvider, HttpGeocodingProvider, ProviderKind};
pub use set::{GeocodingProviderSet, ProviderCounters};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeocodingError {
    #[error("no provider returned a result for the given input")]
    NotFound,

    #[error("all providers are unavailable (breakers open or exhausted retries)")]
    Unavailable,

    #[error("http error calling provider {provider}: {message}")]
    Http { provider: String, message: String },
}

pub type Result<T> = std::result::Result<T, GeocodingError>;
