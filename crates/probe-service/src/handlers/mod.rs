//! HTTP request handlers for the probe.

pub mod health;
pub mod metrics;

pub use health::{health_check, readiness_check, HealthState};
pub use metrics::metrics_handler;
