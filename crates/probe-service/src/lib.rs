//! Kafka round trip latency probe.
//!
//! Sends timestamped beacons into every partition of a topic, reads them back
//! and exports the measured round trip per partition as a Prometheus gauge
//! whose series expire when beacons stop coming back.
//!
//! # Modules
//!
//! - `config` - Probe configuration
//! - `broker` - Broker client traits and the librdkafka implementation
//! - `partitions` - Partition discovery and reconciliation
//! - `producer` - Periodic beacon emitter
//! - `consumer` - Round trip measurement
//! - `gauge` - Gauge family with per-series expiry
//! - `service` - Startup and shutdown of the whole probe
//! - `routes`, `handlers`, `middleware` - Scrape endpoint
//! - `server` - Plain or TLS listener for the scrape endpoint

pub mod beacon;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod gauge;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod partitions;
pub mod producer;
pub mod routes;
pub mod server;
pub mod service;
pub mod tasks;
