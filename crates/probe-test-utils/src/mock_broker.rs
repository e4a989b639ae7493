//! In-memory broker for probe testing.
//!
//! `MockBroker` keeps an append-only log per topic partition. Producer
//! handles append to it; consumer handles read from positions set by
//! `assign_from_end`. All handles opened from one broker share its state, so
//! a beacon sent through the producer connector is visible to consumers
//! opened through the consumer connector.
//!
//! # Example
//!
//! ```rust,ignore
//! use probe_test_utils::MockBroker;
//!
//! let broker = MockBroker::new().with_topic("latency", [0, 1, 2]);
//! broker.fail_metadata(true);
//!
//! // Metadata requests now fail until the flag is cleared.
//! ```

use probe_service::broker::{
    BeaconSink, BeaconSource, BrokerError, Connector, PartitionSource, ReceivedRecord,
};
use probe_service::partitions::PartitionSet;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A record stored in a mock partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub payload: Option<Vec<u8>>,
    pub probe_id: Option<String>,
}

#[derive(Debug, Default)]
struct Assignment {
    topic: String,
    /// Next offset to read, per partition.
    positions: BTreeMap<i32, usize>,
}

#[derive(Debug, Default)]
struct Failures {
    connect: bool,
    metadata: bool,
    send: bool,
    assign: bool,
    poll: bool,
}

#[derive(Debug, Default)]
struct Counters {
    metadata_requests: usize,
    assignments: usize,
    flushes: usize,
    open_producers: usize,
    open_consumers: usize,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, Vec<i32>>,
    logs: HashMap<(String, i32), Vec<StoredRecord>>,
    consumers: HashMap<u64, Assignment>,
    next_consumer_id: u64,
    failures: Failures,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<Inner>,
    appended: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

/// Shared in-memory broker state.
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

impl MockBroker {
    /// Create an empty broker with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with the given partitions.
    #[must_use]
    pub fn with_topic(self, topic: &str, partitions: impl IntoIterator<Item = i32>) -> Self {
        self.set_partitions(topic, partitions);
        self
    }

    /// Replace the partitions reported for `topic`.
    ///
    /// Logs of removed partitions are kept, so a partition that comes back
    /// still has its history.
    pub fn set_partitions(&self, topic: &str, partitions: impl IntoIterator<Item = i32>) {
        let mut partitions: Vec<i32> = partitions.into_iter().collect();
        partitions.sort_unstable();
        partitions.dedup();
        self.shared.lock().topics.insert(topic.to_string(), partitions);
    }

    /// Append a record directly, bypassing any producer handle.
    pub fn inject(&self, topic: &str, partition: i32, payload: Option<&[u8]>, probe_id: Option<&str>) {
        let mut inner = self.shared.lock();
        inner
            .logs
            .entry((topic.to_string(), partition))
            .or_default()
            .push(StoredRecord {
                payload: payload.map(<[u8]>::to_vec),
                probe_id: probe_id.map(ToString::to_string),
            });
        drop(inner);
        self.shared.appended.notify_all();
    }

    /// Records appended to `topic`/`partition`, oldest first.
    #[must_use]
    pub fn records(&self, topic: &str, partition: i32) -> Vec<StoredRecord> {
        self.shared
            .lock()
            .logs
            .get(&(topic.to_string(), partition))
            .cloned()
            .unwrap_or_default()
    }

    /// Partitions currently assigned to any open consumer, merged.
    #[must_use]
    pub fn assigned_partitions(&self) -> PartitionSet {
        self.shared
            .lock()
            .consumers
            .values()
            .flat_map(|a| a.positions.keys().copied())
            .collect()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.shared.lock().failures.connect = fail;
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.shared.lock().failures.metadata = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.shared.lock().failures.send = fail;
    }

    pub fn fail_assign(&self, fail: bool) {
        self.shared.lock().failures.assign = fail;
    }

    pub fn fail_poll(&self, fail: bool) {
        self.shared.lock().failures.poll = fail;
    }

    #[must_use]
    pub fn metadata_requests(&self) -> usize {
        self.shared.lock().counters.metadata_requests
    }

    #[must_use]
    pub fn assignments(&self) -> usize {
        self.shared.lock().counters.assignments
    }

    #[must_use]
    pub fn flushes(&self) -> usize {
        self.shared.lock().counters.flushes
    }

    /// Producer handles opened and not yet dropped.
    #[must_use]
    pub fn open_producers(&self) -> usize {
        self.shared.lock().counters.open_producers
    }

    /// Consumer handles opened and not yet dropped.
    #[must_use]
    pub fn open_consumers(&self) -> usize {
        self.shared.lock().counters.open_consumers
    }

    /// Open a producer handle.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Client`] when connect failures are injected.
    pub fn producer(&self) -> Result<MockProducer, BrokerError> {
        let mut inner = self.shared.lock();
        if inner.failures.connect {
            return Err(BrokerError::Client("injected connect failure".to_string()));
        }
        inner.counters.open_producers += 1;
        Ok(MockProducer {
            broker: self.clone(),
        })
    }

    /// Open a consumer handle with an empty assignment.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Client`] when connect failures are injected.
    pub fn consumer(&self) -> Result<MockConsumer, BrokerError> {
        let mut inner = self.shared.lock();
        if inner.failures.connect {
            return Err(BrokerError::Client("injected connect failure".to_string()));
        }
        let id = inner.next_consumer_id;
        inner.next_consumer_id += 1;
        inner.consumers.insert(id, Assignment::default());
        inner.counters.open_consumers += 1;
        Ok(MockConsumer {
            broker: self.clone(),
            id,
        })
    }

    #[must_use]
    pub fn producer_connector(&self) -> Connector<MockProducer> {
        let broker = self.clone();
        Box::new(move || broker.producer())
    }

    #[must_use]
    pub fn consumer_connector(&self) -> Connector<MockConsumer> {
        let broker = self.clone();
        Box::new(move || broker.consumer())
    }

    fn partitions_of(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let mut inner = self.shared.lock();
        inner.counters.metadata_requests += 1;
        if inner.failures.metadata {
            return Err(BrokerError::Metadata("injected metadata failure".to_string()));
        }
        inner
            .topics
            .get(topic)
            .filter(|partitions| !partitions.is_empty())
            .cloned()
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))
    }
}

/// Producer handle onto a [`MockBroker`].
#[derive(Debug)]
pub struct MockProducer {
    broker: MockBroker,
}

impl PartitionSource for MockProducer {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        self.broker.partitions_of(topic)
    }
}

impl BeaconSink for MockProducer {
    fn send(
        &self,
        topic: &str,
        partition: i32,
        payload: &str,
        probe_id: &str,
    ) -> Result<(), BrokerError> {
        {
            let inner = self.broker.shared.lock();
            if inner.failures.send {
                return Err(BrokerError::Send {
                    partition,
                    reason: "injected send failure".to_string(),
                });
            }
            let known = inner
                .topics
                .get(topic)
                .is_some_and(|partitions| partitions.contains(&partition));
            if !known {
                return Err(BrokerError::Send {
                    partition,
                    reason: "unknown partition".to_string(),
                });
            }
        }
        self.broker
            .inject(topic, partition, Some(payload.as_bytes()), Some(probe_id));
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        self.broker.shared.lock().counters.flushes += 1;
        Ok(())
    }
}

impl Drop for MockProducer {
    fn drop(&mut self) {
        let mut inner = self.broker.shared.lock();
        inner.counters.open_producers = inner.counters.open_producers.saturating_sub(1);
    }
}

/// Consumer handle onto a [`MockBroker`] with its own assignment.
#[derive(Debug)]
pub struct MockConsumer {
    broker: MockBroker,
    id: u64,
}

impl MockConsumer {
    fn drain(inner: &mut Inner, id: u64) -> Vec<ReceivedRecord> {
        let Inner {
            logs, consumers, ..
        } = inner;
        let Some(assignment) = consumers.get_mut(&id) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for (partition, position) in &mut assignment.positions {
            let Some(log) = logs.get(&(assignment.topic.clone(), *partition)) else {
                continue;
            };
            for stored in log.iter().skip(*position) {
                records.push(ReceivedRecord {
                    partition: *partition,
                    payload: stored.payload.clone(),
                    probe_id: stored.probe_id.clone(),
                });
            }
            *position = log.len();
        }
        records
    }
}

impl PartitionSource for MockConsumer {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        self.broker.partitions_of(topic)
    }
}

impl BeaconSource for MockConsumer {
    fn assign_from_end(&self, topic: &str, partitions: &PartitionSet) -> Result<(), BrokerError> {
        let mut inner = self.broker.shared.lock();
        inner.counters.assignments += 1;
        if inner.failures.assign {
            return Err(BrokerError::Assign("injected assign failure".to_string()));
        }

        let positions = partitions
            .iter()
            .map(|partition| {
                let end = inner
                    .logs
                    .get(&(topic.to_string(), partition))
                    .map_or(0, Vec::len);
                (partition, end)
            })
            .collect();
        inner.consumers.insert(
            self.id,
            Assignment {
                topic: topic.to_string(),
                positions,
            },
        );
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<ReceivedRecord>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.broker.shared.lock();
        loop {
            if inner.failures.poll {
                drop(inner);
                // Keep a failing poll from spinning the caller.
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                return Err(BrokerError::Poll("injected poll failure".to_string()));
            }

            let records = Self::drain(&mut inner, self.id);
            if !records.is_empty() {
                return Ok(records);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            inner = self
                .broker
                .shared
                .appended
                .wait_timeout(inner, deadline - now)
                .unwrap()
                .0;
        }
    }
}

impl Drop for MockConsumer {
    fn drop(&mut self) {
        let mut inner = self.broker.shared.lock();
        inner.consumers.remove(&self.id);
        inner.counters.open_consumers = inner.counters.open_consumers.saturating_sub(1);
    }
}
