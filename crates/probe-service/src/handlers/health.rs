//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK while the process is running
//! - `/ready`: Readiness probe - OK once both producer and consumer started

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness of the probe.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// Create a new health state (not ready).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the probe as measuring.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the probe as not measuring (startup failure or shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Liveness probe handler. Does not check any dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 while beacons are being sent and measured, 503 otherwise.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if state.health.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}
