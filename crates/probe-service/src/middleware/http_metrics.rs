//! HTTP metrics middleware.
//!
//! Records every response, including ones produced before a handler runs
//! (401 from basic auth, 404, 405).

use crate::observability::metrics::record_http_request;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Middleware that records path, status and duration of each request.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&path, response.status().as_u16(), start.elapsed());
    response
}
