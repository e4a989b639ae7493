//! # Probe Test Utilities
//!
//! Shared test utilities for the probe service.
//!
//! This crate provides:
//! - In-memory broker (`MockBroker`) implementing the producer and consumer
//!   broker traits, with failure injection
//! - Config fixtures (`TestConfigBuilder`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use probe_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let broker = MockBroker::new().with_topic("latency", [0, 1, 2]);
//!     let config = TestConfigBuilder::new().topic("latency").build();
//!
//!     let service = ProbeService::new(
//!         &config,
//!         broker.producer_connector(),
//!         broker.consumer_connector(),
//!         Arc::new(SystemClock),
//!     )
//!     .unwrap();
//!     service.start().await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_broker;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_broker::*;
