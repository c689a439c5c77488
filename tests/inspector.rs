use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use kafkascope::{
    backend::memory::MemoryCluster,
    client::fetcher::{MessageFilter, OffsetRange},
    error::{Error, ErrorKind},
    record::{Record, ValueFormat},
};

use test_helpers::{CLUSTER, maybe_start_logging, memory_inspector, test_config, ts};

/// `orders` with high-water marks [10, 0, 5], three brokers, replication factor 2.
fn orders_cluster() -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    for id in 1..=3 {
        cluster.add_broker(id, format!("broker-{id}"), 9092);
    }
    cluster.add_topic("orders", 3, 2).unwrap();
    for i in 0..10 {
        cluster
            .produce("orders", 0, format!("k{}", i % 3), format!("v{i}"), ts(i * 10))
            .unwrap();
    }
    for i in 0..5 {
        cluster
            .produce("orders", 2, format!("k{}", i % 3), format!("v{i}"), ts(i * 10 + 5))
            .unwrap();
    }
    cluster
}

fn assert_presentation_order(records: &[Record]) {
    for pair in records.windows(2) {
        assert!(
            pair[0].timestamp > pair[1].timestamp
                || (pair[0].timestamp == pair[1].timestamp && pair[0].offset <= pair[1].offset),
            "out of order: {:?} before {:?}",
            (pair[0].timestamp, pair[0].offset),
            (pair[1].timestamp, pair[1].offset),
        );
    }
}

#[tokio::test]
async fn test_fetch_skips_empty_partition() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let fetched = inspector
        .messages(CLUSTER, "orders", Some(8), None)
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 8);
    assert!(fetched.records.iter().all(|r| r.partition != 1));
    assert!(fetched.skipped.is_empty());
    assert!(!fetched.deadline_exceeded);
    assert_presentation_order(&fetched.records);
    // newest record overall
    assert_eq!(fetched.records[0].timestamp, ts(90));
    assert_eq!(cluster.open_readers(), 0);
}

#[tokio::test]
async fn test_fetch_with_key_filter() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let filter = MessageFilter::default().with_key("k1");
    let fetched = inspector
        .messages(CLUSTER, "orders", None, Some(&filter))
        .await
        .unwrap();
    // partition 0 offsets 1, 4, 7 and partition 2 offsets 1, 4
    assert_eq!(fetched.records.len(), 5);
    assert!(fetched.records.iter().all(|r| r.key == "k1"));
    assert_presentation_order(&fetched.records);
}

#[tokio::test]
async fn test_fetch_with_time_window() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let filter = MessageFilter::default()
        .with_start_time(ts(20))
        .with_end_time(ts(40));
    let fetched = inspector
        .messages(CLUSTER, "orders", None, Some(&filter))
        .await
        .unwrap();
    let stamps: Vec<_> = fetched.records.iter().map(|r| r.timestamp).collect();
    assert_eq!(stamps, vec![ts(40), ts(35), ts(30), ts(25), ts(20)]);
}

#[tokio::test]
async fn test_fetch_with_query_and_format() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster
        .produce("orders", 1, "json", r#"{"id": 7}"#, ts(1_000))
        .unwrap();
    let inspector = memory_inspector(&cluster, test_config());

    let filter = MessageFilter::default().with_format(ValueFormat::Json);
    let fetched = inspector
        .messages(CLUSTER, "orders", None, Some(&filter))
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 1);
    assert_eq!(fetched.records[0].partition, 1);

    let filter = MessageFilter::default().with_query("v9");
    let fetched = inspector
        .messages(CLUSTER, "orders", None, Some(&filter))
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 1);
    assert_eq!(fetched.records[0].offset, 9);
}

#[tokio::test]
async fn test_fetch_latest_is_idempotent() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let first = inspector
        .latest_messages(CLUSTER, "orders", Some(6))
        .await
        .unwrap();
    let second = inspector
        .latest_messages(CLUSTER, "orders", Some(6))
        .await
        .unwrap();
    assert_eq!(first.records, second.records);

    // two records from the tail of partitions 0 and 2 each
    assert_eq!(first.records.len(), 4);
    let mut offsets: Vec<_> = first
        .records
        .iter()
        .map(|r| (r.partition, r.offset))
        .collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![(0, 8), (0, 9), (2, 3), (2, 4)]);
}

#[tokio::test]
async fn test_fetch_range() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let range = OffsetRange {
        partition: Some(0),
        start: 3,
        end: 6,
    };
    let fetched = inspector
        .messages_in_range(CLUSTER, "orders", range, None)
        .await
        .unwrap();
    let offsets: Vec<_> = fetched.records.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![5, 4, 3]);

    let range = OffsetRange {
        partition: None,
        start: 6,
        end: 3,
    };
    let err = inspector
        .messages_in_range(CLUSTER, "orders", range, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let range = OffsetRange {
        partition: Some(7),
        start: 0,
        end: 3,
    };
    assert_matches!(
        inspector
            .messages_in_range(CLUSTER, "orders", range, None)
            .await,
        Err(Error::UnknownPartition { partition: 7, .. })
    );
}

#[tokio::test]
async fn test_unreachable_partition_degrades() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.set_partition_unreachable("orders", 2);
    let config = test_config().with_request_timeout(Duration::from_millis(200));
    let inspector = memory_inspector(&cluster, config);

    let fetched = inspector
        .messages(CLUSTER, "orders", Some(100), None)
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 10);
    assert!(fetched.records.iter().all(|r| r.partition == 0));
    assert_eq!(fetched.skipped.len(), 1);
    assert_eq!(fetched.skipped[0].target, "orders/2");
}

#[tokio::test]
async fn test_hung_partition_returns_partial_result() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.set_partition_hung("orders", 2);
    let config = test_config().with_request_timeout(Duration::from_millis(200));
    let inspector = memory_inspector(&cluster, config);

    let fetched = inspector
        .messages(CLUSTER, "orders", Some(100), None)
        .await
        .unwrap();
    assert_eq!(fetched.records.len(), 10);
    assert!(fetched.deadline_exceeded);
    assert_eq!(cluster.open_readers(), 0);
}

#[tokio::test]
async fn test_not_found() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let err = inspector
        .messages("nope", "orders", None, None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::UnknownCluster(_));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = inspector
        .messages(CLUSTER, "nope", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = inspector.consumer_group(CLUSTER, "nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_invalid_limit() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let err = inspector
        .messages(CLUSTER, "orders", Some(0), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_metadata_timeout() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.set_metadata_delay(Some(Duration::from_secs(10)));
    let config = test_config().with_request_timeout(Duration::from_millis(100));
    let inspector = memory_inspector(&cluster, config);

    let err = inspector
        .messages(CLUSTER, "orders", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let err = inspector.cluster_health(CLUSTER).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_group_lag() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.add_group("g1", "Stable");
    cluster.commit("g1", "orders", 0, 7).unwrap();
    cluster.add_group("caught-up", "Stable");
    cluster.commit("caught-up", "orders", 0, 10).unwrap();
    cluster.commit("caught-up", "orders", 2, 5).unwrap();
    let inspector = memory_inspector(&cluster, test_config());

    let lag = inspector.group_lag(CLUSTER).await.unwrap();
    assert!(lag.skipped.is_empty());
    let lag = lag.items;
    assert_eq!(lag.len(), 1);
    assert_eq!(lag[0].group_id, "g1");
    assert_eq!(lag[0].topic, "orders");
    assert_eq!(lag[0].total_lag, 3);
}

#[tokio::test]
async fn test_group_lag_skips_failing_group() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.add_group("g1", "Stable");
    cluster.commit("g1", "orders", 2, 1).unwrap();
    cluster.add_group("broken", "Stable");
    cluster.commit("broken", "orders", 0, 0).unwrap();
    cluster.fail_group_offsets("broken");
    let inspector = memory_inspector(&cluster, test_config());

    let lag = inspector.group_lag(CLUSTER).await.unwrap();
    assert_eq!(lag.items.len(), 1);
    assert_eq!(lag.items[0].group_id, "g1");
    assert_eq!(lag.items[0].total_lag, 4);
    assert_matches!(&lag.skipped[..], [s] if s.target == "group broken");

    let metrics = inspector.group_metrics(CLUSTER).await.unwrap();
    let ids: Vec<_> = metrics.items.iter().map(|m| m.group_id.as_str()).collect();
    assert_eq!(ids, vec!["g1"]);
    assert_matches!(&metrics.skipped[..], [s] if s.target == "group broken");
}

#[tokio::test]
async fn test_group_metrics() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.add_topic("payments", 1, 1).unwrap();
    for i in 0..4 {
        cluster.produce("payments", 0, "k", "v", ts(i)).unwrap();
    }
    cluster.add_group("billing", "Stable");
    cluster
        .add_member(
            "billing",
            "m1",
            &[("orders".to_owned(), vec![0, 1, 2])].into(),
        )
        .unwrap();
    cluster.commit("billing", "orders", 0, 2).unwrap();
    cluster.commit("billing", "payments", 0, 2).unwrap();
    cluster.add_group("idle", "Empty");
    let inspector = memory_inspector(&cluster, test_config());

    let metrics = inspector.group_metrics(CLUSTER).await.unwrap().items;
    assert_eq!(metrics.len(), 2);

    let billing = &metrics[0];
    assert_eq!(billing.group_id, "billing");
    assert_eq!(billing.member_count, 1);
    assert_eq!(billing.topic_count, 2);
    assert_eq!(billing.total_lag, 10);
    assert_eq!(billing.max_lag, 8);
    assert_eq!(billing.avg_lag, 5);
    assert!(billing.is_stable);

    assert_eq!(metrics[1].group_id, "idle");
    assert_eq!(metrics[1].total_lag, 0);
    assert!(!metrics[1].is_stable);
}

#[tokio::test]
async fn test_cluster_health() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let health = inspector.cluster_health(CLUSTER).await.unwrap();
    assert!(health.is_healthy);
    assert_eq!(health.total_brokers, 3);
    assert_eq!(health.online_brokers, 3);
    assert_eq!(health.total_topics, 1);
    assert_eq!(health.total_partitions, 3);
    assert_eq!(health.controller_id, Some(1));

    cluster.set_isr("orders", 0, vec![1]).unwrap();
    let health = inspector.cluster_health(CLUSTER).await.unwrap();
    assert!(!health.is_healthy);
    assert_eq!(health.under_replicated, 1);
    assert_eq!(health.offline_replicas, 1);
    assert_eq!(
        health.is_healthy,
        health.online_brokers == health.total_brokers
            && health.under_replicated == 0
            && health.offline_replicas == 0
    );
}

#[tokio::test]
async fn test_cluster_health_with_slow_controller_lookup() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.set_controller_delay(Some(Duration::from_secs(10)));
    cluster.set_probe_delay(Some(Duration::from_millis(5)));
    let inspector = memory_inspector(&cluster, test_config());

    let health = inspector.cluster_health(CLUSTER).await.unwrap();
    assert_eq!(health.controller_id, None);
    assert_eq!(health.online_brokers, 3);
    assert!(health.is_healthy);
}

#[tokio::test]
async fn test_cluster_health_degraded_brokers() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.set_broker_online(2, false);
    cluster.deregister_broker(1);
    let inspector = memory_inspector(&cluster, test_config());

    let health = inspector.cluster_health(CLUSTER).await.unwrap();
    assert!(!health.is_healthy);
    // broker 1 still hosts replicas
    assert_eq!(health.total_brokers, 3);
    assert_eq!(health.online_brokers, 1);
    assert_eq!(health.controller_id, None);

    let brokers = inspector.broker_metrics(CLUSTER).await.unwrap();
    let ids: Vec<_> = brokers.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(brokers[0].host, None);
    assert!(!brokers[0].is_online);
    assert!(!brokers[1].is_online);
    assert!(brokers[2].is_online);
    assert!(brokers.iter().all(|b| !b.is_controller));
}

#[tokio::test]
async fn test_topic_metrics() {
    maybe_start_logging();
    let cluster = orders_cluster();
    cluster.truncate_before("orders", 0, 4).unwrap();
    cluster.add_topic("__consumer_offsets", 1, 1).unwrap();
    let inspector = memory_inspector(&cluster, test_config());

    let metrics = inspector.topic_metrics(CLUSTER).await.unwrap();
    assert!(metrics.skipped.is_empty());
    let metrics = metrics.items;
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name, "orders");
    assert_eq!(metrics[0].partition_count, 3);
    assert_eq!(metrics[0].replication_factor, 2);
    assert_eq!(metrics[0].retained_messages, 11);

    cluster.set_partition_unreachable("orders", 2);
    let metrics = inspector.topic_metrics(CLUSTER).await.unwrap();
    assert_eq!(metrics.items[0].retained_messages, 6);
    assert_matches!(&metrics.skipped[..], [s] if s.target == "orders/2");
}

#[tokio::test]
async fn test_inventory() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    inspector.create_topic(CLUSTER, "audit", 2, 3).await.unwrap();
    let names: Vec<_> = inspector
        .topics(CLUSTER, false)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["audit", "orders"]);

    let details = inspector.topic(CLUSTER, "audit").await.unwrap();
    assert_eq!(details.partitions.len(), 2);
    assert_eq!(details.replication_factor, 3);

    inspector.delete_topic(CLUSTER, "audit").await.unwrap();
    let err = inspector.topic(CLUSTER, "audit").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let brokers = inspector.brokers(CLUSTER).await.unwrap();
    assert_eq!(brokers.len(), 3);
    assert!(brokers[0].is_controller);
}

#[tokio::test]
async fn test_registry() {
    maybe_start_logging();
    let cluster = orders_cluster();
    let inspector = memory_inspector(&cluster, test_config());

    let clusters = inspector.list_clusters();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].name, CLUSTER);

    // no in-memory cluster behind that name
    let err = inspector
        .add_cluster("other", vec!["other:9092".to_owned()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    let err = inspector.add_cluster(CLUSTER, vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    inspector.remove_cluster(CLUSTER).unwrap();
    assert!(inspector.list_clusters().is_empty());
    let err = inspector.topics(CLUSTER, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
