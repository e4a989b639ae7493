//! Broker client seam.
//!
//! The probe needs exactly four things from the broker: list the partitions
//! of a topic, send a record to an explicit partition, assign a consumer to
//! explicit partitions positioned at their end, and poll with a bounded
//! timeout. Those are expressed as blocking traits so the same producer and
//! consumer code runs against librdkafka ([`kafka`]) and the in-memory mock
//! in `probe-test-utils`.
//!
//! All methods may block up to their timeout; callers run them off the async
//! reactor (`spawn_blocking` ticks and the dedicated poll thread).

#[cfg(feature = "kafka")]
pub mod kafka;

use crate::partitions::PartitionSet;
use std::time::Duration;
use thiserror::Error;

/// Record header carrying the probe instance identifier.
pub const PROBE_ID_HEADER: &str = "probe-id";

/// Errors surfaced by a broker client.
///
/// All of them are transient from the probe's point of view: the failed
/// operation is skipped and implicitly retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("failed to create broker client: {0}")]
    Client(String),

    #[error("metadata request failed: {0}")]
    Metadata(String),

    #[error("topic {0} not found in broker metadata")]
    UnknownTopic(String),

    #[error("failed to enqueue record for partition {partition}: {reason}")]
    Send { partition: i32, reason: String },

    #[error("failed to assign partitions: {0}")]
    Assign(String),

    #[error("poll failed: {0}")]
    Poll(String),

    #[error("flush failed: {0}")]
    Flush(String),
}

/// A record handed back by [`BeaconSource::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRecord {
    /// Partition the record was read from.
    pub partition: i32,
    /// Raw payload, if the record had one.
    pub payload: Option<Vec<u8>>,
    /// Value of the [`PROBE_ID_HEADER`] header, if present and UTF-8.
    pub probe_id: Option<String>,
}

/// Anything that can describe the partitions of a topic.
pub trait PartitionSource: Send + Sync {
    /// Partition ids currently reported by broker metadata for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Metadata`] or [`BrokerError::UnknownTopic`].
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError>;
}

/// Producer side of the broker.
pub trait BeaconSink: PartitionSource {
    /// Enqueue one record for an explicit partition.
    ///
    /// Returns once the record is handed to the client. Delivery outcome is
    /// reported asynchronously by the implementation (logged and counted),
    /// never retried.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Send`] when the client refuses the record.
    fn send(&self, topic: &str, partition: i32, payload: &str, probe_id: &str)
        -> Result<(), BrokerError>;

    /// Wait for outstanding records to be delivered, up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Flush`] if records are still queued at the deadline.
    fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}

/// Consumer side of the broker.
pub trait BeaconSource: PartitionSource {
    /// Replace the assignment with exactly `partitions` of `topic`, each
    /// positioned at its current end offset.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Assign`].
    fn assign_from_end(&self, topic: &str, partitions: &PartitionSet) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for records and return whatever is available.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Poll`].
    fn poll(&self, timeout: Duration) -> Result<Vec<ReceivedRecord>, BrokerError>;
}

/// Opens a broker handle when a component starts.
pub type Connector<T> = Box<dyn Fn() -> Result<T, BrokerError> + Send + Sync>;
