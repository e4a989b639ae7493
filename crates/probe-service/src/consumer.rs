//! Round trip consumer.
//!
//! Reads the probe topic from a dedicated poll thread and turns every beacon
//! this probe sent into a latency sample in the shared [`ExpiringGauge`].
//!
//! Partitions are assigned manually. A refresh schedule tracks broker
//! metadata and, after every change, reassigns the consumer to exactly the
//! tracked partitions positioned at their end offsets, so only beacons sent
//! after watching begins are measured.
//!
//! # Shutdown
//!
//! `close` cancels the poll loop, waits for the poll thread to report that it
//! left the loop and dropped its handle, joins it, stops the refresh schedule
//! and only then releases the consumer handle.

use crate::beacon;
use crate::broker::{BeaconSource, Connector, ReceivedRecord};
use crate::config::Config;
use crate::errors::ProbeError;
use crate::gauge::ExpiringGauge;
use crate::observability::metrics;
use crate::partitions::{PartitionSet, PartitionTracker, Refresh, Role};
use crate::tasks::RepeatingTask;
use common::clock::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumer identity, gauge labels and timing.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub id: String,
    pub bootstrap_servers: String,
    pub topic: String,
    pub refresh_interval: Duration,
    pub poll_timeout: Duration,
    pub log_responses: bool,
}

impl ConsumerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            id: config.id.clone(),
            bootstrap_servers: config.bootstrap_servers.clone(),
            topic: config.topic.clone(),
            refresh_interval: config.partition_refresh_interval(),
            poll_timeout: config.poll_timeout(),
            log_responses: config.log_responses,
        }
    }
}

struct Running<S> {
    source: Arc<S>,
    refresh: RepeatingTask,
    cancel_token: CancellationToken,
    exited: oneshot::Receiver<()>,
    thread: thread::JoinHandle<()>,
}

/// Measures round trips of this probe's beacons.
pub struct RoundTripConsumer<S: BeaconSource + 'static> {
    settings: Arc<ConsumerSettings>,
    connector: Connector<S>,
    gauge: Arc<ExpiringGauge>,
    clock: Arc<dyn Clock>,
    tracker: Arc<PartitionTracker>,
    running: Mutex<Option<Running<S>>>,
}

impl<S: BeaconSource + 'static> RoundTripConsumer<S> {
    /// Create a stopped consumer writing samples to `gauge`.
    ///
    /// `gauge` must have the four labels `id`, `bootstrap_servers`, `topic`
    /// and `partition`, in that order.
    pub fn new(
        settings: ConsumerSettings,
        connector: Connector<S>,
        gauge: Arc<ExpiringGauge>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracker = Arc::new(PartitionTracker::new(settings.topic.clone(), Role::Consumer));
        Self {
            settings: Arc::new(settings),
            connector,
            gauge,
            clock,
            tracker,
            running: Mutex::new(None),
        }
    }

    /// Open the consumer handle, start the refresh schedule and spawn the
    /// poll thread.
    ///
    /// Calling `start` on a running consumer does nothing. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Broker`] if the consumer handle cannot be opened
    /// and [`ProbeError::Thread`] if the poll thread cannot be spawned.
    pub fn start(&self) -> Result<(), ProbeError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            debug!(target: "probe.consumer", "Round trip consumer already started");
            return Ok(());
        }

        info!(target: "probe.consumer", topic = %self.settings.topic, "Starting round trip consumer");
        let source = Arc::new((self.connector)()?);

        let refresh = {
            let source = Arc::clone(&source);
            let tracker = Arc::clone(&self.tracker);
            RepeatingTask::spawn(
                "consumer-partition-refresh",
                Duration::ZERO,
                self.settings.refresh_interval,
                move || reconcile_assignment(source.as_ref(), &tracker),
            )
        };

        let cancel_token = CancellationToken::new();
        let (exited_tx, exited) = oneshot::channel();
        let thread = {
            let source = Arc::clone(&source);
            let settings = Arc::clone(&self.settings);
            let gauge = Arc::clone(&self.gauge);
            let clock = Arc::clone(&self.clock);
            let cancel_token = cancel_token.clone();
            thread::Builder::new()
                .name(format!("probe-consumer-{}", self.settings.id))
                .spawn(move || {
                    poll_loop(
                        source.as_ref(),
                        &settings,
                        &gauge,
                        clock.as_ref(),
                        &cancel_token,
                    );
                    drop(source);
                    // The receiver is gone only if close was abandoned.
                    let _ = exited_tx.send(());
                })
                .map_err(ProbeError::Thread)?
        };

        *running = Some(Running {
            source,
            refresh,
            cancel_token,
            exited,
            thread,
        });

        info!(target: "probe.consumer", "Round trip consumer started");
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

    /// Partitions the consumer is currently assigned to.
    #[must_use]
    pub fn partitions(&self) -> Arc<PartitionSet> {
        self.tracker.current()
    }

    /// Stop the poll thread and the refresh schedule, then release the
    /// consumer handle.
    ///
    /// Waits for an in-progress poll to return (at most the poll timeout).
    /// Closing a consumer that is not running does nothing.
    pub async fn close(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            source,
            refresh,
            cancel_token,
            exited,
            thread,
        }) = running
        else {
            return;
        };

        info!(target: "probe.consumer", "Stopping round trip consumer");
        cancel_token.cancel();

        if exited.await.is_err() {
            warn!(target: "probe.consumer", "Poll thread exited without reporting");
        }
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!(target: "probe.consumer", "Poll thread panicked"),
            Err(e) => error!(target: "probe.consumer", error = %e, "Failed to join poll thread"),
        }

        refresh.stop().await;

        if let Err(e) = tokio::task::spawn_blocking(move || drop(source)).await {
            error!(target: "probe.consumer", error = %e, "Failed to release consumer handle");
        }
        info!(target: "probe.consumer", "Round trip consumer stopped");
    }
}

impl<S: BeaconSource + 'static> Drop for RoundTripConsumer<S> {
    /// Signal a running poll thread to exit without waiting for it. The
    /// thread releases its handle reference when its current poll returns.
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            warn!(target: "probe.consumer", "Round trip consumer dropped without close");
            running.cancel_token.cancel();
        }
    }
}

/// Refresh partition metadata and reassign on change.
///
/// A failed assignment invalidates the tracker so the next refresh retries.
pub fn reconcile_assignment<S: BeaconSource + ?Sized>(source: &S, tracker: &PartitionTracker) {
    let Refresh::Changed(partitions) = tracker.refresh(source) else {
        return;
    };

    match source.assign_from_end(tracker.topic(), &partitions) {
        Ok(()) => info!(
            target: "probe.consumer",
            partitions = %partitions,
            "Assigned partitions at end offsets"
        ),
        Err(e) => {
            warn!(
                target: "probe.consumer",
                partitions = %partitions,
                error = %e,
                "Failed to assign partitions, retrying on next refresh"
            );
            tracker.invalidate();
        }
    }
}

fn poll_loop<S: BeaconSource + ?Sized>(
    source: &S,
    settings: &ConsumerSettings,
    gauge: &ExpiringGauge,
    clock: &dyn Clock,
    cancel_token: &CancellationToken,
) {
    info!(target: "probe.consumer", "Poll loop started");

    while !cancel_token.is_cancelled() {
        match source.poll(settings.poll_timeout) {
            Ok(records) => {
                for record in &records {
                    record_round_trip(record, settings, gauge, clock.now_millis());
                }
            }
            Err(e) => {
                warn!(target: "probe.consumer", error = %e, "Poll failed");
                metrics::record_poll_error();
            }
        }
    }

    info!(target: "probe.consumer", "Poll loop stopped");
}

/// Write the round trip of `record` to the gauge if it is one of ours.
/// Returns the measured milliseconds.
pub fn record_round_trip(
    record: &ReceivedRecord,
    settings: &ConsumerSettings,
    gauge: &ExpiringGauge,
    now_ms: i64,
) -> Option<i64> {
    let round_trip = match beacon::measure(record, &settings.id, now_ms) {
        Ok(Some(round_trip)) => round_trip,
        Ok(None) => return None,
        Err(e) => {
            warn!(target: "probe.consumer", error = %e, "Discarding malformed beacon");
            metrics::record_malformed_beacon();
            return None;
        }
    };

    let partition = round_trip.partition.to_string();
    let labels = [
        settings.id.as_str(),
        settings.bootstrap_servers.as_str(),
        settings.topic.as_str(),
        partition.as_str(),
    ];
    #[allow(clippy::cast_precision_loss)]
    let value = round_trip.elapsed_ms as f64;
    if let Err(e) = gauge.set(&labels, value) {
        error!(target: "probe.consumer", error = %e, "Failed to record round trip");
        return None;
    }
    metrics::record_beacon_received();

    if settings.log_responses {
        info!(
            target: "probe.consumer",
            id = %settings.id,
            bootstrap_servers = %settings.bootstrap_servers,
            topic = %settings.topic,
            partition = round_trip.partition,
            round_trip_ms = round_trip.elapsed_ms,
            "Beacon round trip"
        );
    }
    Some(round_trip.elapsed_ms)
}
