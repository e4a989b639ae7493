//! Observability for the probe.
//!
//! `metrics` holds the process counters recorded through the `metrics`
//! facade. The expiring latency gauge is a `prometheus` collector of its own
//! and is appended to the same scrape response by the metrics handler.

pub mod metrics;
