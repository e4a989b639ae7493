//! Scrape handler.

use crate::routes::AppState;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::error;

/// Prometheus text format content type.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `GET /metrics`: the round trip gauge followed by the process counters.
///
/// Reading the gauge applies expiry, so a scrape is what flips stale series
/// to the expired sentinel.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let mut body = match state.gauge.render() {
        Ok(body) => body,
        Err(e) => {
            error!(target: "probe.http", error = %e, "Failed to encode round trip gauge");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    body.push_str(&state.metrics_handle.render());
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response()
}
