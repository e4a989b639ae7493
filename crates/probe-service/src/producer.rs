//! Beacon producer.
//!
//! Sends one timestamped beacon to every partition of the probe topic on a
//! delay-then-period schedule. A second schedule keeps the partition set in
//! step with broker metadata, so partitions added to the topic start
//! receiving beacons within one refresh interval.
//!
//! Sends are fire-and-forget. A send the client refuses is logged and counted
//! and the round moves on to the next partition; nothing is retried.

use crate::beacon;
use crate::broker::{BeaconSink, Connector};
use crate::config::Config;
use crate::errors::ProbeError;
use crate::observability::metrics;
use crate::partitions::{PartitionSet, PartitionTracker, Role};
use crate::tasks::RepeatingTask;
use common::clock::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long `close` waits for queued beacons to be delivered.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer schedule and identity.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub id: String,
    pub topic: String,
    pub delay: Duration,
    pub period: Duration,
    pub refresh_interval: Duration,
}

impl ProducerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            id: config.id.clone(),
            topic: config.topic.clone(),
            delay: config.delay(),
            period: config.period(),
            refresh_interval: config.partition_refresh_interval(),
        }
    }
}

struct Running<S> {
    sink: Arc<S>,
    refresh: RepeatingTask,
    emit: RepeatingTask,
}

/// Periodically sends a beacon to every partition of the probe topic.
pub struct BeaconProducer<S: BeaconSink + 'static> {
    settings: ProducerSettings,
    connector: Connector<S>,
    clock: Arc<dyn Clock>,
    tracker: Arc<PartitionTracker>,
    running: Mutex<Option<Running<S>>>,
}

impl<S: BeaconSink + 'static> BeaconProducer<S> {
    /// Create a stopped producer. Nothing touches the broker until `start`.
    pub fn new(settings: ProducerSettings, connector: Connector<S>, clock: Arc<dyn Clock>) -> Self {
        let tracker = Arc::new(PartitionTracker::new(settings.topic.clone(), Role::Producer));
        Self {
            settings,
            connector,
            clock,
            tracker,
            running: Mutex::new(None),
        }
    }

    /// Open the producer handle and start the refresh and emit schedules.
    ///
    /// Calling `start` on a running producer does nothing. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Broker`] if the producer handle cannot be opened.
    pub fn start(&self) -> Result<(), ProbeError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            debug!(target: "probe.producer", "Beacon producer already started");
            return Ok(());
        }

        info!(target: "probe.producer", topic = %self.settings.topic, "Starting beacon producer");
        let sink = Arc::new((self.connector)()?);

        let refresh = {
            let sink = Arc::clone(&sink);
            let tracker = Arc::clone(&self.tracker);
            RepeatingTask::spawn(
                "producer-partition-refresh",
                Duration::ZERO,
                self.settings.refresh_interval,
                move || {
                    tracker.refresh(sink.as_ref());
                },
            )
        };

        let emit = {
            let sink = Arc::clone(&sink);
            let tracker = Arc::clone(&self.tracker);
            let clock = Arc::clone(&self.clock);
            let id = self.settings.id.clone();
            RepeatingTask::spawn(
                "producer-emit",
                self.settings.delay,
                self.settings.period,
                move || {
                    emit_round(sink.as_ref(), &tracker, &id, clock.as_ref());
                },
            )
        };

        *running = Some(Running {
            sink,
            refresh,
            emit,
        });

        info!(
            target: "probe.producer",
            delay_ms = self.settings.delay.as_millis(),
            period_ms = self.settings.period.as_millis(),
            "Beacon producer started"
        );
        Ok(())
    }

    /// Whether `start` has run and `close` has not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Partitions beacons are currently sent to.
    #[must_use]
    pub fn partitions(&self) -> Arc<PartitionSet> {
        self.tracker.current()
    }

    /// Stop both schedules, then flush and release the producer handle.
    ///
    /// A round already in progress finishes first. Closing a producer that
    /// is not running does nothing.
    pub async fn close(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            sink,
            refresh,
            emit,
        }) = running
        else {
            return;
        };

        info!(target: "probe.producer", "Stopping beacon producer");
        emit.stop().await;
        refresh.stop().await;

        let flushed = tokio::task::spawn_blocking(move || {
            let result = sink.flush(FLUSH_TIMEOUT);
            drop(sink);
            result
        })
        .await;

        match flushed {
            Ok(Ok(())) => info!(target: "probe.producer", "Beacon producer stopped"),
            Ok(Err(e)) => warn!(
                target: "probe.producer",
                error = %e,
                "Beacon producer stopped with undelivered beacons"
            ),
            Err(e) => error!(
                target: "probe.producer",
                error = %e,
                "Beacon producer flush panicked"
            ),
        }
    }
}

/// Send one beacon to every tracked partition. Returns how many were
/// accepted by the client.
pub fn emit_round<S: BeaconSink + ?Sized>(
    sink: &S,
    tracker: &PartitionTracker,
    probe_id: &str,
    clock: &dyn Clock,
) -> usize {
    let partitions = tracker.current();
    if partitions.is_empty() {
        debug!(target: "probe.producer", "No partitions known yet, skipping beacon round");
        return 0;
    }

    let mut sent = 0;
    for partition in partitions.iter() {
        let payload = beacon::encode_send_time(clock.now_millis());
        match sink.send(tracker.topic(), partition, &payload, probe_id) {
            Ok(()) => {
                metrics::record_beacon_sent(partition);
                sent += 1;
            }
            Err(e) => {
                warn!(
                    target: "probe.producer",
                    partition,
                    error = %e,
                    "Failed to send beacon"
                );
                metrics::record_beacon_send_failure("enqueue");
            }
        }
    }
    sent
}
