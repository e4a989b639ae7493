//! Common utilities shared by the latency probe crates.

#![warn(clippy::pedantic)]

/// Wall-clock abstraction used for beacon timestamps and metric expiry
pub mod clock;

/// Java-style `.properties` file loading
pub mod properties;

/// Module for secret types that prevent accidental logging
pub mod secret;
