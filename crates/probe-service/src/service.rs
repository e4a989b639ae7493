//! Probe orchestration.
//!
//! [`ProbeService`] owns the round trip gauge, the consumer and the producer.
//! Startup brings the consumer up before the producer so the first beacons
//! have a reader; shutdown runs in the opposite order.

use crate::broker::{BeaconSink, BeaconSource, Connector};
use crate::config::Config;
use crate::consumer::{ConsumerSettings, RoundTripConsumer};
use crate::errors::ProbeError;
use crate::gauge::{ExpiringGauge, GaugeError};
use crate::handlers::HealthState;
use crate::producer::{BeaconProducer, ProducerSettings};
use common::clock::Clock;
use std::sync::Arc;
use tracing::{error, info};

/// Name of the round trip gauge.
pub const ROUND_TRIP_METRIC: &str = "probe_round_trip_time_milliseconds";

/// Help text of the round trip gauge.
pub const ROUND_TRIP_HELP: &str = "Kafka round trip time of probe beacons in milliseconds. \
     -1 indicates no beacon came back within metric.expiration.period.ms";

/// Labels of the round trip gauge, in order.
pub const ROUND_TRIP_LABELS: [&str; 4] = ["id", "bootstrap_servers", "topic", "partition"];

/// Build the round trip gauge for `config`.
///
/// # Errors
///
/// Returns [`GaugeError`] if the expiration period is rejected.
pub fn round_trip_gauge(config: &Config, clock: Arc<dyn Clock>) -> Result<ExpiringGauge, GaugeError> {
    ExpiringGauge::builder(ROUND_TRIP_METRIC, ROUND_TRIP_HELP)
        .label_names(ROUND_TRIP_LABELS)
        .ttl(config.metric_expiration())
        .clock(clock)
        .build()
}

/// The running probe: one producer, one consumer, one gauge.
pub struct ProbeService<P: BeaconSink + 'static, C: BeaconSource + 'static> {
    producer: BeaconProducer<P>,
    consumer: RoundTripConsumer<C>,
    gauge: Arc<ExpiringGauge>,
    health: Arc<HealthState>,
}

impl<P: BeaconSink + 'static, C: BeaconSource + 'static> ProbeService<P, C> {
    /// Wire the components. Nothing touches the broker until `start`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Gauge`] if the gauge definition is invalid.
    pub fn new(
        config: &Config,
        producer_connector: Connector<P>,
        consumer_connector: Connector<C>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ProbeError> {
        let gauge = Arc::new(round_trip_gauge(config, Arc::clone(&clock))?);

        let consumer = RoundTripConsumer::new(
            ConsumerSettings::from_config(config),
            consumer_connector,
            Arc::clone(&gauge),
            Arc::clone(&clock),
        );
        let producer = BeaconProducer::new(
            ProducerSettings::from_config(config),
            producer_connector,
            clock,
        );

        Ok(Self {
            producer,
            consumer,
            gauge,
            health: Arc::new(HealthState::new()),
        })
    }

    /// Round trip gauge served on `/metrics`.
    #[must_use]
    pub fn gauge(&self) -> Arc<ExpiringGauge> {
        Arc::clone(&self.gauge)
    }

    /// Readiness served on `/ready`.
    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    #[must_use]
    pub fn producer(&self) -> &BeaconProducer<P> {
        &self.producer
    }

    #[must_use]
    pub fn consumer(&self) -> &RoundTripConsumer<C> {
        &self.consumer
    }

    /// Start the consumer, then the producer.
    ///
    /// If the producer fails to start the consumer is closed again.
    ///
    /// # Errors
    ///
    /// Returns the first component's startup error.
    pub async fn start(&self) -> Result<(), ProbeError> {
        self.consumer.start()?;
        if let Err(e) = self.producer.start() {
            error!(error = %e, "Failed to start beacon producer");
            self.consumer.close().await;
            return Err(e);
        }

        self.health.set_ready();
        info!("Probe running");
        Ok(())
    }

    /// Close the producer, then the consumer. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.health.set_not_ready();
        self.producer.close().await;
        self.consumer.close().await;
        info!("Probe stopped");
    }
}
