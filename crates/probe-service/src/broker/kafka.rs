//! librdkafka broker client.
//!
//! [`RdKafkaSink`] wraps a `ThreadedProducer`, whose background thread
//! drives delivery reports into [`DeliveryReporter`]. [`RdKafkaSource`] wraps
//! a `BaseConsumer` that is assigned partitions manually; nothing is ever
//! committed.

use super::{
    BeaconSink, BeaconSource, BrokerError, Connector, PartitionSource, ReceivedRecord,
    PROBE_ID_HEADER,
};
use crate::observability::metrics;
use crate::partitions::PartitionSet;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::metadata::Metadata;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for metadata requests.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on records returned by one `poll`.
const MAX_POLL_RECORDS: usize = 500;

fn client_config(properties: &BTreeMap<String, String>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in properties {
        config.set(key, value);
    }
    config
}

fn partitions_from_metadata(metadata: &Metadata, topic: &str) -> Result<Vec<i32>, BrokerError> {
    let entry = metadata
        .topics()
        .iter()
        .find(|t| t.name() == topic)
        .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

    if let Some(err) = entry.error() {
        return Err(BrokerError::Metadata(format!("{err:?}")));
    }
    if entry.partitions().is_empty() {
        return Err(BrokerError::UnknownTopic(topic.to_string()));
    }
    Ok(entry.partitions().iter().map(|p| p.id()).collect())
}

/// Logs and counts failed deliveries.
#[derive(Debug, Default)]
pub struct DeliveryReporter;

impl ClientContext for DeliveryReporter {}

impl ProducerContext for DeliveryReporter {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        if let Err((e, message)) = delivery_result {
            warn!(
                target: "probe.producer",
                partition = message.partition(),
                error = %e,
                "Beacon delivery failed"
            );
            metrics::record_beacon_send_failure("delivery");
        }
    }
}

/// Beacon sink backed by a librdkafka producer.
pub struct RdKafkaSink {
    producer: ThreadedProducer<DeliveryReporter>,
}

impl RdKafkaSink {
    /// Create a producer from client properties.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Client`] if librdkafka rejects the configuration.
    pub fn new(properties: &BTreeMap<String, String>) -> Result<Self, BrokerError> {
        let producer = client_config(properties)
            .create_with_context(DeliveryReporter)
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        Ok(Self { producer })
    }

    /// Connector opening a new producer from `properties` on every call.
    #[must_use]
    pub fn connector(properties: BTreeMap<String, String>) -> Connector<Self> {
        Box::new(move || Self::new(&properties))
    }
}

impl PartitionSource for RdKafkaSink {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(Some(topic), METADATA_TIMEOUT)
            .map_err(|e| BrokerError::Metadata(e.to_string()))?;
        partitions_from_metadata(&metadata, topic)
    }
}

impl BeaconSink for RdKafkaSink {
    fn send(
        &self,
        topic: &str,
        partition: i32,
        payload: &str,
        probe_id: &str,
    ) -> Result<(), BrokerError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: PROBE_ID_HEADER,
            value: Some(probe_id),
        });
        let record = BaseRecord::<(), str>::to(topic)
            .partition(partition)
            .payload(payload)
            .headers(headers);

        self.producer
            .send(record)
            .map_err(|(e, _record)| BrokerError::Send {
                partition,
                reason: e.to_string(),
            })
    }

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.producer
            .flush(timeout)
            .map_err(|e| BrokerError::Flush(e.to_string()))
    }
}

/// Beacon source backed by a librdkafka consumer.
pub struct RdKafkaSource {
    consumer: BaseConsumer,
}

impl RdKafkaSource {
    /// Create a consumer from client properties.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Client`] if librdkafka rejects the configuration.
    pub fn new(properties: &BTreeMap<String, String>) -> Result<Self, BrokerError> {
        let consumer = client_config(properties)
            .create()
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        Ok(Self { consumer })
    }

    /// Connector opening a new consumer from `properties` on every call.
    #[must_use]
    pub fn connector(properties: BTreeMap<String, String>) -> Connector<Self> {
        Box::new(move || Self::new(&properties))
    }

    fn to_record(message: &BorrowedMessage<'_>) -> ReceivedRecord {
        let probe_id = message.headers().and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == PROBE_ID_HEADER)
                .and_then(|header| header.value)
                .and_then(|value| std::str::from_utf8(value).ok())
                .map(ToString::to_string)
        });

        ReceivedRecord {
            partition: message.partition(),
            payload: message.payload().map(<[u8]>::to_vec),
            probe_id,
        }
    }

    fn next(&self, timeout: Duration) -> Result<Option<ReceivedRecord>, BrokerError> {
        match self.consumer.poll(timeout) {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(Self::to_record(&message))),
            Some(Err(e)) => Err(poll_error(&e)),
        }
    }
}

fn poll_error(e: &KafkaError) -> BrokerError {
    BrokerError::Poll(e.to_string())
}

impl PartitionSource for RdKafkaSource {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(topic), METADATA_TIMEOUT)
            .map_err(|e| BrokerError::Metadata(e.to_string()))?;
        partitions_from_metadata(&metadata, topic)
    }
}

impl BeaconSource for RdKafkaSource {
    fn assign_from_end(&self, topic: &str, partitions: &PartitionSet) -> Result<(), BrokerError> {
        let mut assignment = TopicPartitionList::with_capacity(partitions.len());
        for partition in partitions.iter() {
            assignment
                .add_partition_offset(topic, partition, Offset::End)
                .map_err(|e| BrokerError::Assign(e.to_string()))?;
        }
        self.consumer
            .assign(&assignment)
            .map_err(|e| BrokerError::Assign(e.to_string()))
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<ReceivedRecord>, BrokerError> {
        let Some(first) = self.next(timeout)? else {
            return Ok(Vec::new());
        };

        let mut records = vec![first];
        while records.len() < MAX_POLL_RECORDS {
            match self.next(Duration::ZERO) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break,
                Err(e) => {
                    // Return what was read so far.
                    debug!(target: "probe.consumer", error = %e, "Poll drain interrupted");
                    break;
                }
            }
        }
        Ok(records)
    }
}
