//! Pipeline integration tests.
//!
//! Runs the producer, consumer and gauge together against the in-memory
//! broker from `probe-test-utils`, on real time with short schedules.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::clock::{Clock, SystemClock};
use probe_service::broker::{BrokerError, Connector};
use probe_service::consumer::{ConsumerSettings, RoundTripConsumer};
use probe_service::gauge::EXPIRED_VALUE;
use probe_service::partitions::PartitionSet;
use probe_service::service::{round_trip_gauge, ProbeService};
use probe_test_utils::{
    MockBroker, MockProducer, TestConfigBuilder, TEST_BOOTSTRAP_SERVERS, TEST_PROBE_ID, TEST_TOPIC,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn labels(partition: i32) -> [String; 4] {
    [
        TEST_PROBE_ID.to_string(),
        TEST_BOOTSTRAP_SERVERS.to_string(),
        TEST_TOPIC.to_string(),
        partition.to_string(),
    ]
}

fn set(partitions: &[i32]) -> PartitionSet {
    partitions.iter().copied().collect()
}

/// Check `condition` every 10ms until it holds or `WAIT` elapses.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn service(
    broker: &MockBroker,
    config: &probe_service::config::Config,
) -> ProbeService<MockProducer, probe_test_utils::MockConsumer> {
    ProbeService::new(
        config,
        broker.producer_connector(),
        broker.consumer_connector(),
        Arc::new(SystemClock),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_round_trips_recorded_for_every_partition() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0, 1, 2]);
    let service = service(&broker, &TestConfigBuilder::new().build());
    let gauge = service.gauge();

    service.start().await.unwrap();
    assert!(service.health().is_ready());

    let measured = eventually(|| {
        (0..3).all(|p| gauge.get(&labels(p)).unwrap().is_some_and(|v| v >= 0.0))
    })
    .await;
    assert!(measured, "expected a round trip on partitions 0, 1 and 2");
    assert_eq!(gauge.len(), 3);

    let record = broker.records(TEST_TOPIC, 0).pop().unwrap();
    assert_eq!(record.probe_id.as_deref(), Some(TEST_PROBE_ID));
    let sent_at: i64 = String::from_utf8(record.payload.unwrap())
        .unwrap()
        .parse()
        .unwrap();
    assert!(sent_at <= SystemClock.now_millis());

    service.shutdown().await;
    assert!(!service.health().is_ready());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_change_is_followed_by_both_sides() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0, 1, 2]);
    let service = service(&broker, &TestConfigBuilder::new().build());
    let gauge = service.gauge();
    service.start().await.unwrap();

    assert!(
        eventually(|| broker.assigned_partitions() == set(&[0, 1, 2])).await,
        "consumer never assigned the initial partitions"
    );

    broker.set_partitions(TEST_TOPIC, [0, 2, 3]);

    let followed = eventually(|| {
        *service.producer().partitions() == set(&[0, 2, 3])
            && *service.consumer().partitions() == set(&[0, 2, 3])
            && broker.assigned_partitions() == set(&[0, 2, 3])
    })
    .await;
    assert!(followed, "producer and consumer should track {{0, 2, 3}}");

    let measured = eventually(|| gauge.get(&labels(3)).unwrap().is_some_and(|v| v >= 0.0)).await;
    assert!(measured, "expected a round trip on the new partition 3");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_and_malformed_beacons_are_ignored() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let config = TestConfigBuilder::new().build();
    let gauge = Arc::new(round_trip_gauge(&config, Arc::new(SystemClock)).unwrap());
    let consumer = RoundTripConsumer::new(
        ConsumerSettings::from_config(&config),
        broker.consumer_connector(),
        Arc::clone(&gauge),
        Arc::new(SystemClock),
    );
    consumer.start().unwrap();
    assert!(eventually(|| broker.assigned_partitions() == set(&[0])).await);

    let now = SystemClock.now_millis().to_string();
    broker.inject(TEST_TOPIC, 0, Some(now.as_bytes()), Some("another-probe"));
    broker.inject(TEST_TOPIC, 0, Some(now.as_bytes()), None);
    broker.inject(TEST_TOPIC, 0, Some(b"not a timestamp"), Some(TEST_PROBE_ID));
    broker.inject(TEST_TOPIC, 0, None, Some(TEST_PROBE_ID));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gauge.is_empty());
    assert!(consumer.is_running());

    broker.inject(TEST_TOPIC, 0, Some(now.as_bytes()), Some(TEST_PROBE_ID));
    let measured = eventually(|| gauge.get(&labels(0)).unwrap().is_some()).await;
    assert!(measured);
    assert_eq!(gauge.len(), 1);

    consumer.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_beacons_sent_before_assignment_are_not_measured() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let now = SystemClock.now_millis().to_string();
    broker.inject(TEST_TOPIC, 0, Some(now.as_bytes()), Some(TEST_PROBE_ID));

    let config = TestConfigBuilder::new().build();
    let gauge = Arc::new(round_trip_gauge(&config, Arc::new(SystemClock)).unwrap());
    let consumer = RoundTripConsumer::new(
        ConsumerSettings::from_config(&config),
        broker.consumer_connector(),
        Arc::clone(&gauge),
        Arc::new(SystemClock),
    );
    consumer.start().unwrap();
    assert!(eventually(|| broker.assigned_partitions() == set(&[0])).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gauge.is_empty());

    consumer.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gauge_expires_when_beacons_stop_arriving() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let config = TestConfigBuilder::new().expiration_ms(200).build();
    let service = service(&broker, &config);
    let gauge = service.gauge();
    service.start().await.unwrap();

    assert!(eventually(|| gauge.get(&labels(0)).unwrap().is_some_and(|v| v >= 0.0)).await);

    broker.fail_send(true);

    let expired = eventually(|| gauge.get(&labels(0)).unwrap() == Some(EXPIRED_VALUE)).await;
    assert!(expired, "series should read -1 once the ttl passes");
    assert!(gauge.render().unwrap().contains(
        "probe_round_trip_time_milliseconds{id=\"probe-test\",bootstrap_servers=\"mock-broker:9092\",topic=\"latency\",partition=\"0\"} -1"
    ));

    broker.fail_send(false);
    let recovered = eventually(|| gauge.get(&labels(0)).unwrap().is_some_and(|v| v >= 0.0)).await;
    assert!(recovered, "series should recover once beacons flow again");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metadata_outage_at_startup_recovers() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0, 1]);
    broker.fail_metadata(true);
    let service = service(&broker, &TestConfigBuilder::new().build());
    let gauge = service.gauge();

    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service.producer().partitions().is_empty());
    assert!(broker.records(TEST_TOPIC, 0).is_empty());

    broker.fail_metadata(false);
    let measured = eventually(|| gauge.len() == 2).await;
    assert!(measured);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poll_errors_do_not_stop_the_consumer() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let service = service(&broker, &TestConfigBuilder::new().build());
    let gauge = service.gauge();
    service.start().await.unwrap();

    broker.fail_poll(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service.consumer().is_running());
    broker.fail_poll(false);

    assert!(eventually(|| gauge.get(&labels(0)).unwrap().is_some()).await);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_is_idempotent_and_close_releases_handles() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let service = service(&broker, &TestConfigBuilder::new().build());

    service.start().await.unwrap();
    service.start().await.unwrap();
    assert_eq!(broker.open_producers(), 1);
    assert_eq!(broker.open_consumers(), 1);

    service.shutdown().await;
    assert_eq!(broker.open_producers(), 0);
    assert_eq!(broker.open_consumers(), 0);
    assert_eq!(broker.flushes(), 1);
    assert!(!service.producer().is_running());
    assert!(!service.consumer().is_running());

    service.shutdown().await;
    assert_eq!(broker.flushes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_before_start_is_harmless() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let service = service(&broker, &TestConfigBuilder::new().build());

    service.shutdown().await;
    assert_eq!(broker.flushes(), 0);
    assert_eq!(broker.metadata_requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_after_close() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let service = service(&broker, &TestConfigBuilder::new().build());

    service.start().await.unwrap();
    service.shutdown().await;
    service.start().await.unwrap();
    assert!(service.producer().is_running());
    assert_eq!(broker.open_consumers(), 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producer_start_failure_closes_consumer() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    let failing: Connector<MockProducer> =
        Box::new(|| Err(BrokerError::Client("broker unreachable".to_string())));
    let service = ProbeService::new(
        &TestConfigBuilder::new().build(),
        failing,
        broker.consumer_connector(),
        Arc::new(SystemClock),
    )
    .unwrap();

    assert!(service.start().await.is_err());
    assert!(!service.consumer().is_running());
    assert_eq!(broker.open_consumers(), 0);
    assert!(!service.health().is_ready());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_failure_is_reported() {
    let broker = MockBroker::new().with_topic(TEST_TOPIC, [0]);
    broker.fail_connect(true);
    let service = service(&broker, &TestConfigBuilder::new().build());

    assert!(service.start().await.is_err());
    assert!(!service.producer().is_running());
    assert!(!service.consumer().is_running());
}
