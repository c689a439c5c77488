#![cfg(feature = "rdkafka")]
use chrono::{DateTime, Utc};
use rdkafka::{
    ClientConfig, Offset, TopicPartitionList,
    consumer::{BaseConsumer, CommitMode, Consumer},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

/// Produce.
pub async fn produce(
    connection: &str,
    topic_name: &str,
    partition_index: i32,
    records: Vec<(String, String, DateTime<Utc>)>,
) {
    // create client
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", connection);
    cfg.set("message.timeout.ms", "5000");
    let client: FutureProducer<_> = cfg.create().unwrap();

    for (key, value, timestamp) in records {
        let f_record = FutureRecord::to(topic_name)
            .partition(partition_index)
            .key(&key)
            .payload(&value)
            .timestamp(timestamp.timestamp_millis());
        client.send(f_record, Timeout::Never).await.unwrap();
    }
}

/// Commit an offset on behalf of a consumer group.
pub fn commit(connection: &str, group_id: &str, topic_name: &str, partition_index: i32, offset: i64) {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", connection);
    cfg.set("group.id", group_id);
    cfg.set("enable.auto.commit", "false");
    let client: BaseConsumer = cfg.create().unwrap();

    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(topic_name, partition_index, Offset::Offset(offset))
        .unwrap();
    client.commit(&tpl, CommitMode::Sync).unwrap();
}
