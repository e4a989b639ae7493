//! HTTP middleware for the scrape endpoint.

pub mod basic_auth;
pub mod http_metrics;

pub use basic_auth::{require_basic_auth, BasicAuthState};
pub use http_metrics::http_metrics_middleware;
