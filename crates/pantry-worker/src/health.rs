//! Liveness/readiness endpoints for a worker process, grounded on the
//! teacher's `/health` axum route (`rootsignal-server/src/routes.rs`)
//! split into two signals: `/livez` (the dequeue loop is still ticking)
//! and `/readyz` (currently accepting new jobs — false during backpressure
//! and the graceful-shutdown drain).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

#[derive(Clone)]
pub struct Health {
    ready: Arc<AtomicBool>,
    last_heartbeat: Arc<Mutex<Instant>>,
}

impl Health {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn is_live(&self, max_silence: Duration) -> bool {
        self.last_heartbeat.lock().unwrap().elapsed() < max_silence
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Build a small router exposing `/livez` and `/readyz` against `health`.
/// `max_silence` bounds how long the dequeue loop may go without a
/// heartbeat before `/livez` reports unhealthy.
pub fn router(health: Health, max_silence: Duration) -> Router {
    let live_health = health.clone();
    let ready_health = health;

    Router::new()
        .route(
            "/livez",
            get(move || {
                let health = live_health.clone();
                async move {
                    if health.is_live(max_silence) {
                        (StatusCode::OK, Json(HealthBody { status: "live" }))
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "stalled" }))
                    }
                }
            }),
        )
        .route(
            "/readyz",
            get(move || {
                let health = ready_health.clone();
                async move {
                    if health.is_ready() {
                        (StatusCode::OK, Json(HealthBody { status: "ready" }))
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "not_ready" }))
                    }
                }
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_health_is_not_ready_but_live() {
        let health = Health::new();
        assert!(!health.is_ready());
        assert!(health.is_live(Duration::from_secs(60)));
    }

    #[test]
    fn stale_heartbeat_is_not_live() {
        let health = Health::new();
        assert!(!health.is_live(Duration::from_millis(0)));
    }
}
