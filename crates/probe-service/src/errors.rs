//! Probe error types.
//!
//! Only startup failures ever reach `main`: configuration problems, an
//! invalid gauge definition, or a broker handle that cannot be opened.
//! Everything that goes wrong while beacons are flowing is contained in the
//! component that saw it, logged, and retried on the next tick.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::gauge::GaugeError;
use thiserror::Error;

/// Top-level probe error.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Invalid or missing configuration (fatal at startup).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Broker client failure.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Invalid gauge definition or label arity mismatch.
    #[error("gauge error: {0}")]
    Gauge(#[from] GaugeError),

    /// Failed to spawn the consumer poll thread.
    #[error("failed to spawn poll thread: {0}")]
    Thread(#[source] std::io::Error),

    /// Scrape endpoint failure (bind or serve).
    #[error("http server error: {0}")]
    Http(#[source] std::io::Error),

    /// Certificate or key for the HTTPS listener could not be loaded.
    #[error("tls error: {0}")]
    Tls(#[source] std::io::Error),

    /// Prometheus recorder could not be installed.
    #[error("metrics recorder error: {0}")]
    Metrics(String),
}

/// A received record that looked like a beacon for this probe but could not
/// be turned into a latency sample.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeaconError {
    #[error("beacon on partition {partition} has no payload")]
    MissingPayload { partition: i32 },

    #[error("beacon on partition {partition} has a non UTF-8 payload")]
    NotUtf8 { partition: i32 },

    #[error("beacon on partition {partition} has a non-numeric send time {payload:?}")]
    InvalidTimestamp { partition: i32, payload: String },
}
