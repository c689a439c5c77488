#![cfg(feature = "rdkafka")]
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kafkascope::{
    backend::rdkafka::RdKafkaConnector,
    client::{Inspector, InspectorBuilder, fetcher::MessageFilter},
    config::InspectorConfig,
    error::ErrorKind,
};

mod rdkafka_helper;

use test_helpers::{TestConfig, maybe_start_logging, random_topic_name};

const CLUSTER: &str = "integration";

fn inspector(cfg: &TestConfig) -> Inspector {
    let connector = RdKafkaConnector::new().with_client_id("kafkascope-tests");
    let inspector = InspectorBuilder::new(Arc::new(connector))
        .with_config(InspectorConfig::default().with_request_timeout(Duration::from_secs(10)))
        .build();
    inspector
        .add_cluster(CLUSTER, cfg.bootstrap_brokers.clone())
        .unwrap();
    inspector
}

/// Topic creation is eventually consistent.
async fn wait_for_topic(inspector: &Inspector, topic: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while inspector.topic(CLUSTER, topic).await.is_err() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_brokers_and_health() {
    maybe_start_logging();
    let cfg = maybe_skip_kafka_integration!();
    let inspector = inspector(&cfg);

    let brokers = inspector.brokers(CLUSTER).await.unwrap();
    assert!(!brokers.is_empty());

    let health = inspector.cluster_health(CLUSTER).await.unwrap();
    assert_eq!(health.total_brokers, brokers.len());
    assert_eq!(health.online_brokers, brokers.len());
    assert!(health.controller_id.is_some());
}

#[tokio::test]
async fn test_topic_crud() {
    maybe_start_logging();
    let cfg = maybe_skip_kafka_integration!(delete);
    let inspector = inspector(&cfg);
    let topic = random_topic_name();

    inspector.create_topic(CLUSTER, &topic, 2, 1).await.unwrap();
    wait_for_topic(&inspector, &topic).await;

    let topics = inspector.topics(CLUSTER, false).await.unwrap();
    assert!(topics.iter().any(|t| t.name == topic && t.partition_count == 2));

    let err = inspector.create_topic(CLUSTER, &topic, 2, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    inspector.delete_topic(CLUSTER, &topic).await.unwrap();
}

#[tokio::test]
async fn test_fetch_messages() {
    maybe_start_logging();
    let cfg = maybe_skip_kafka_integration!();
    let inspector = inspector(&cfg);
    let topic = random_topic_name();
    let connection = &cfg.bootstrap_brokers[0];

    inspector.create_topic(CLUSTER, &topic, 2, 1).await.unwrap();
    wait_for_topic(&inspector, &topic).await;

    let now = Utc::now();
    for partition in 0..2 {
        let records = (0..5)
            .map(|i| {
                (
                    format!("k{i}"),
                    format!("{{\"p\": {partition}, \"i\": {i}}}"),
                    now + chrono::Duration::milliseconds(i * 10 + i64::from(partition)),
                )
            })
            .collect();
        rdkafka_helper::produce(connection, &topic, partition, records).await;
    }

    let fetched = inspector
        .messages(CLUSTER, &topic, Some(100), None)
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 10);
    assert!(fetched.skipped.is_empty());
    assert!(
        fetched
            .records
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp)
    );

    let filter = MessageFilter::default().with_key("k3");
    let fetched = inspector
        .messages(CLUSTER, &topic, None, Some(&filter))
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 2);

    let latest = inspector
        .latest_messages(CLUSTER, &topic, Some(4))
        .await
        .unwrap();
    assert_eq!(latest.records.len(), 4);
    assert!(latest.records.iter().all(|r| r.offset >= 3));
}

#[tokio::test]
async fn test_group_lag() {
    maybe_start_logging();
    let cfg = maybe_skip_kafka_integration!();
    let inspector = inspector(&cfg);
    let topic = random_topic_name();
    let group = format!("group_{topic}");
    let connection = &cfg.bootstrap_brokers[0];

    inspector.create_topic(CLUSTER, &topic, 1, 1).await.unwrap();
    wait_for_topic(&inspector, &topic).await;

    let now = Utc::now();
    let records = (0..10)
        .map(|i| (format!("k{i}"), format!("v{i}"), now))
        .collect();
    rdkafka_helper::produce(connection, &topic, 0, records).await;
    rdkafka_helper::commit(connection, &group, &topic, 0, 7);

    let lag = inspector.group_lag(CLUSTER).await.unwrap();
    let entry = lag
        .items
        .iter()
        .find(|e| e.group_id == group)
        .expect("lag entry for group");
    assert_eq!(entry.topic, topic);
    assert_eq!(entry.total_lag, 3);
}
