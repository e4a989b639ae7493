//! HTTP routes for the probe.
//!
//! Defines the Axum router and application state.

use crate::config::BasicAuthCredentials;
use crate::gauge::ExpiringGauge;
use crate::handlers::{self, HealthState};
use crate::middleware::{http_metrics_middleware, require_basic_auth, BasicAuthState};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Round trip gauge written by the consumer.
    pub gauge: Arc<ExpiringGauge>,

    /// Renders the process counters.
    pub metrics_handle: PrometheusHandle,

    /// Readiness of the producer and consumer.
    pub health: Arc<HealthState>,

    /// Credentials guarding `/metrics`, if basic authentication is enabled.
    pub basic_auth: Option<BasicAuthCredentials>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/metrics` - Round trip gauge and process counters (basic auth when enabled)
/// - `/health` - Liveness probe - public
/// - `/ready` - Readiness probe - public
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let mut metrics_routes = Router::new().route("/metrics", get(handlers::metrics_handler));
    if let Some(credentials) = state.basic_auth.clone() {
        metrics_routes = metrics_routes.route_layer(middleware::from_fn_with_state(
            Arc::new(BasicAuthState { credentials }),
            require_basic_auth,
        ));
    }

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    metrics_routes
        .merge(public_routes)
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
