use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{
    BenchmarkGroup, BenchmarkId, Criterion, SamplingMode, criterion_group, criterion_main,
    measurement::WallTime,
};
use kafkascope::{
    backend::memory::{MemoryCluster, MemoryConnector},
    client::{Inspector, InspectorBuilder, fetcher::MessageFilter},
    config::InspectorConfig,
};
use tokio::runtime::Runtime;

const CLUSTER: &str = "bench";
const TOPIC: &str = "bench";
const RECORDS_PER_PARTITION: i64 = 2_000;

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = benchark_group(c, "fetch");

    for n_partitions in [1, 8, 32] {
        let inspector = setup(n_partitions);

        group.bench_with_input(
            BenchmarkId::new("latest", n_partitions),
            &inspector,
            |b, inspector| {
                b.to_async(runtime()).iter(|| async {
                    let fetched = inspector
                        .latest_messages(CLUSTER, TOPIC, Some(100))
                        .await
                        .unwrap();
                    assert_eq!(fetched.records.len(), 100);
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("filtered", n_partitions),
            &inspector,
            |b, inspector| {
                let filter = MessageFilter::default().with_key("k7");
                b.to_async(runtime()).iter(|| async {
                    let fetched = inspector
                        .messages(CLUSTER, TOPIC, Some(1_000), Some(&filter))
                        .await
                        .unwrap();
                    assert!(!fetched.records.is_empty());
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("lag", n_partitions),
            &inspector,
            |b, inspector| {
                b.to_async(runtime()).iter(|| async {
                    let lag = inspector.group_lag(CLUSTER).await.unwrap();
                    assert_eq!(lag.items.len(), 1);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

fn setup(n_partitions: i32) -> Inspector {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.add_broker(0, "localhost", 9092);
    cluster.add_topic(TOPIC, n_partitions, 1).unwrap();
    cluster.add_group("consumers", "Stable");
    for partition in 0..n_partitions {
        for offset in 0..RECORDS_PER_PARTITION {
            cluster
                .produce(
                    TOPIC,
                    partition,
                    format!("k{}", offset % 10),
                    vec![b'x'; 1_000],
                    Utc.timestamp_millis_opt(offset).unwrap(),
                )
                .unwrap();
        }
        cluster
            .commit("consumers", TOPIC, partition, RECORDS_PER_PARTITION / 2)
            .unwrap();
    }

    let connector = MemoryConnector::default().with_cluster(CLUSTER, cluster);
    let inspector = InspectorBuilder::new(Arc::new(connector))
        .with_config(
            InspectorConfig::default()
                .with_read_timeout(Duration::from_millis(10))
                .with_max_limit(100_000),
        )
        .build();
    inspector
        .add_cluster(CLUSTER, vec!["localhost:9092".to_owned()])
        .unwrap();
    inspector
}

fn benchark_group<'a>(c: &'a mut Criterion, name: &str) -> BenchmarkGroup<'a, WallTime> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);
    group.sampling_mode(SamplingMode::Flat);
    group
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap()
}
