//! Backend talking to a live cluster through librdkafka.
//!
//! librdkafka's metadata and offset calls are blocking, so they run on the blocking thread pool. Partition
//! reads use one [`StreamConsumer`] per scan that is closed when the reader is dropped.
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    consumer::{BaseConsumer, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::BorrowedMessage,
};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::{
    backend::member_assignment,
    cluster::{ClusterAdmin, ClusterHandles, Connector, PartitionLog, PartitionReader},
    error::{Error, Result},
    metadata::{
        ClusterMetadata, CommittedOffset, GroupDescription, GroupMember, MetadataBroker,
        MetadataPartition, MetadataTopic, OffsetWindow, TopicPartition,
    },
    record::Record,
};

/// Builds rdkafka clients for a list of bootstrap brokers.
///
/// Security settings (`security.protocol`, `sasl.*`, `ssl.*`) are passed through [`with_option`](Self::with_option).
#[derive(Debug, Clone)]
pub struct RdKafkaConnector {
    client_id: String,
    metadata_timeout: Duration,
    options: BTreeMap<String, String>,
}

impl Default for RdKafkaConnector {
    fn default() -> Self {
        Self {
            client_id: "kafkascope".to_owned(),
            metadata_timeout: Duration::from_secs(5),
            options: BTreeMap::new(),
        }
    }
}

impl RdKafkaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(self, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..self
        }
    }

    /// Timeout of the blocking metadata, offset and group calls.
    pub fn with_metadata_timeout(self, metadata_timeout: Duration) -> Self {
        Self {
            metadata_timeout,
            ..self
        }
    }

    /// Sets an arbitrary librdkafka option on every client.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    fn client_config(&self, bootstrap_brokers: &[String]) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", bootstrap_brokers.join(","))
            .set("client.id", &self.client_id)
            .set("allow.auto.create.topics", "false");
        for (k, v) in &self.options {
            config.set(k, v);
        }
        config
    }
}

impl Connector for RdKafkaConnector {
    fn connect(&self, cluster_name: &str, bootstrap_brokers: &[String]) -> Result<ClusterHandles> {
        let config = self.client_config(bootstrap_brokers);
        let consumer: BaseConsumer = config.create().map_err(Error::unavailable)?;
        let admin: AdminClient<DefaultClientContext> =
            config.create().map_err(Error::unavailable)?;
        info!(
            cluster = cluster_name,
            brokers = %bootstrap_brokers.join(","),
            "created rdkafka clients",
        );

        let cluster = Arc::new(RdKafkaCluster {
            client_id: self.client_id.clone(),
            config,
            timeout: self.metadata_timeout,
            consumer: Arc::new(consumer),
            admin,
        });
        Ok(ClusterHandles {
            admin: Arc::clone(&cluster) as Arc<dyn ClusterAdmin>,
            log: cluster as Arc<dyn PartitionLog>,
        })
    }
}

struct RdKafkaCluster {
    client_id: String,
    config: ClientConfig,
    timeout: Duration,
    consumer: Arc<BaseConsumer>,
    admin: AdminClient<DefaultClientContext>,
}

impl Debug for RdKafkaCluster {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdKafkaCluster")
            .field("client_id", &self.client_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RdKafkaCluster {
    /// Runs a blocking call against the shared metadata consumer.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&BaseConsumer, Duration) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || f(&consumer, timeout)).await?
    }

    fn admin_options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.timeout))
    }
}

fn error_code(e: &KafkaError) -> Option<RDKafkaErrorCode> {
    e.rdkafka_error_code()
}

fn is_unknown_topic(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownPartition
    )
}

fn partition_error(tp: &TopicPartition, e: KafkaError) -> Error {
    match error_code(&e) {
        Some(code) if is_unknown_topic(code) => Error::UnknownPartition {
            topic: tp.topic.clone(),
            partition: tp.partition,
        },
        _ => Error::Unavailable(format!("{tp}: {e}")),
    }
}

fn fetch_metadata(
    consumer: &BaseConsumer,
    timeout: Duration,
    topics: Option<Vec<String>>,
) -> Result<ClusterMetadata> {
    let single = match topics.as_deref() {
        Some([name]) => Some(name.as_str()),
        _ => None,
    };
    let md = consumer
        .fetch_metadata(single, timeout)
        .map_err(Error::unavailable)?;

    let brokers = md
        .brokers()
        .iter()
        .map(|b| MetadataBroker {
            node_id: b.id(),
            host: b.host().to_owned(),
            port: b.port(),
        })
        .collect();

    let mut all: BTreeMap<&str, MetadataTopic> = BTreeMap::new();
    for t in md.topics() {
        if let Some(code) = t.error().map(RDKafkaErrorCode::from) {
            if is_unknown_topic(code) {
                continue;
            }
            return Err(Error::Unavailable(format!("topic \"{}\": {code}", t.name())));
        }
        all.insert(
            t.name(),
            MetadataTopic {
                name: t.name().to_owned(),
                is_internal: t.name().starts_with("__"),
                partitions: t
                    .partitions()
                    .iter()
                    .map(|p| MetadataPartition {
                        partition_index: p.id(),
                        leader_id: (p.leader() >= 0).then_some(p.leader()),
                        replica_nodes: p.replicas().to_vec(),
                        isr_nodes: p.isr().to_vec(),
                    })
                    .collect(),
            },
        );
    }

    let topics = match topics {
        None => all.into_values().collect(),
        Some(names) => names
            .into_iter()
            .map(|name| all.remove(name.as_str()).ok_or(Error::UnknownTopic(name)))
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(ClusterMetadata { brokers, topics })
}

#[allow(unsafe_code)]
fn fetch_controller_id(consumer: &BaseConsumer, timeout: Duration) -> Option<i32> {
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    // SAFETY: the native handle lives as long as `consumer`, which outlives this call.
    let id = unsafe {
        rdkafka::bindings::rd_kafka_controllerid(consumer.client().native_ptr(), timeout_ms)
    };
    (id >= 0).then_some(id)
}

fn fetch_groups(
    consumer: &BaseConsumer,
    timeout: Duration,
    group_id: Option<&str>,
) -> Result<Vec<GroupDescription>> {
    let list = consumer
        .fetch_group_list(group_id, timeout)
        .map_err(Error::unavailable)?;
    Ok(list
        .groups()
        .iter()
        .map(|g| GroupDescription {
            group_id: g.name().to_owned(),
            state: g.state().to_owned(),
            protocol: g.protocol().to_owned(),
            protocol_type: g.protocol_type().to_owned(),
            members: g
                .members()
                .iter()
                .map(|m| GroupMember {
                    member_id: m.id().to_owned(),
                    client_id: m.client_id().to_owned(),
                    client_host: m.client_host().to_owned(),
                    assignment: member_assignment(
                        g.name(),
                        m.id(),
                        m.assignment().unwrap_or_default(),
                    ),
                })
                .collect(),
        })
        .collect())
}

impl ClusterAdmin for RdKafkaCluster {
    fn metadata(&self, topics: Option<Vec<String>>) -> BoxFuture<'_, Result<ClusterMetadata>> {
        self.blocking(move |consumer, timeout| fetch_metadata(consumer, timeout, topics))
            .boxed()
    }

    fn controller_id(&self) -> BoxFuture<'_, Result<Option<i32>>> {
        self.blocking(|consumer, timeout| Ok(fetch_controller_id(consumer, timeout)))
            .boxed()
    }

    fn broker_online<'a>(&'a self, broker: &'a MetadataBroker) -> BoxFuture<'a, bool> {
        async move {
            let Ok(port) = u16::try_from(broker.port) else {
                return false;
            };
            match TcpStream::connect((broker.host.as_str(), port)).await {
                Ok(_) => true,
                Err(e) => {
                    debug!(broker = broker.node_id, e = %e, "broker probe failed");
                    false
                }
            }
        }
        .boxed()
    }

    fn list_groups(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.blocking(|consumer, timeout| {
            Ok(fetch_groups(consumer, timeout, None)?
                .into_iter()
                .map(|g| g.group_id)
                .collect())
        })
        .boxed()
    }

    fn describe_groups<'a>(
        &'a self,
        group_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<GroupDescription>>> {
        let wanted = group_ids.to_vec();
        self.blocking(move |consumer, timeout| {
            let single = match wanted.as_slice() {
                [id] => Some(id.as_str()),
                _ => None,
            };
            Ok(fetch_groups(consumer, timeout, single)?
                .into_iter()
                .filter(|g| wanted.contains(&g.group_id))
                .collect())
        })
        .boxed()
    }

    fn committed_offsets<'a>(
        &'a self,
        group_id: &'a str,
        partitions: Vec<TopicPartition>,
    ) -> BoxFuture<'a, Result<Vec<CommittedOffset>>> {
        let mut config = self.config.clone();
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false");
        let group_id = group_id.to_owned();
        let timeout = self.timeout;

        async move {
            tokio::task::spawn_blocking(move || {
                let consumer: BaseConsumer = config.create().map_err(Error::unavailable)?;
                let mut tpl = TopicPartitionList::new();
                for tp in &partitions {
                    tpl.add_partition(&tp.topic, tp.partition);
                }
                let committed = consumer.committed_offsets(tpl, timeout).map_err(|e| {
                    Error::Unavailable(format!("offsets of group \"{group_id}\": {e}"))
                })?;

                Ok(partitions
                    .into_iter()
                    .map(|tp| {
                        let offset = committed
                            .find_partition(&tp.topic, tp.partition)
                            .and_then(|elem| match elem.offset() {
                                Offset::Offset(o) if o >= 0 => Some(o),
                                _ => None,
                            });
                        CommittedOffset {
                            partition: tp,
                            offset,
                        }
                    })
                    .collect())
            })
            .await?
        }
        .boxed()
    }

    fn create_topic<'a>(
        &'a self,
        name: &'a str,
        num_partitions: i32,
        replication_factor: i16,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let topic = NewTopic::new(
                name,
                num_partitions,
                TopicReplication::Fixed(i32::from(replication_factor)),
            );
            let results = self
                .admin
                .create_topics([&topic], &self.admin_options())
                .await
                .map_err(Error::unavailable)?;
            for result in results {
                if let Err((topic, code)) = result {
                    return Err(match code {
                        RDKafkaErrorCode::TopicAlreadyExists
                        | RDKafkaErrorCode::InvalidPartitions
                        | RDKafkaErrorCode::InvalidReplicationFactor
                        | RDKafkaErrorCode::InvalidTopic => {
                            Error::InvalidArgument(format!("cannot create \"{topic}\": {code}"))
                        }
                        _ => Error::Unavailable(format!("cannot create \"{topic}\": {code}")),
                    });
                }
            }
            info!(topic = name, num_partitions, replication_factor, "created topic");
            Ok(())
        }
        .boxed()
    }

    fn delete_topic<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let results = self
                .admin
                .delete_topics(&[name], &self.admin_options())
                .await
                .map_err(Error::unavailable)?;
            for result in results {
                if let Err((topic, code)) = result {
                    return Err(if is_unknown_topic(code) {
                        Error::UnknownTopic(topic)
                    } else {
                        Error::Unavailable(format!("cannot delete \"{topic}\": {code}"))
                    });
                }
            }
            info!(topic = name, "deleted topic");
            Ok(())
        }
        .boxed()
    }
}

impl PartitionLog for RdKafkaCluster {
    fn watermarks<'a>(
        &'a self,
        partition: &'a TopicPartition,
    ) -> BoxFuture<'a, Result<OffsetWindow>> {
        let tp = partition.clone();
        self.blocking(move |consumer, timeout| {
            let (oldest, newest) = consumer
                .fetch_watermarks(&tp.topic, tp.partition, timeout)
                .map_err(|e| partition_error(&tp, e))?;
            Ok(OffsetWindow { oldest, newest })
        })
        .boxed()
    }

    fn offset_for_time<'a>(
        &'a self,
        partition: &'a TopicPartition,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<i64>>> {
        let tp = partition.clone();
        self.blocking(move |consumer, timeout| {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(at.timestamp_millis()))
                .map_err(|e| partition_error(&tp, e))?;
            let resolved = consumer
                .offsets_for_times(tpl, timeout)
                .map_err(|e| partition_error(&tp, e))?;
            let elem = resolved
                .find_partition(&tp.topic, tp.partition)
                .ok_or_else(|| Error::InvalidResponse(format!("no offset returned for {tp}")))?;
            elem.error().map_err(|e| partition_error(&tp, e))?;
            Ok(match elem.offset() {
                Offset::Offset(o) => Some(o),
                _ => None,
            })
        })
        .boxed()
    }

    fn open_reader<'a>(
        &'a self,
        partition: &'a TopicPartition,
        start_offset: i64,
    ) -> BoxFuture<'a, Result<Box<dyn PartitionReader>>> {
        async move {
            let mut config = self.config.clone();
            config
                .set("group.id", format!("{}-reader", self.client_id))
                .set("enable.auto.commit", "false")
                .set("enable.partition.eof", "false")
                .set("auto.offset.reset", "earliest");
            let consumer: StreamConsumer = config.create().map_err(Error::unavailable)?;

            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(
                &partition.topic,
                partition.partition,
                Offset::Offset(start_offset),
            )
            .map_err(|e| partition_error(partition, e))?;
            consumer
                .assign(&tpl)
                .map_err(|e| partition_error(partition, e))?;

            debug!(%partition, start_offset, "opened reader");
            Ok(Box::new(RdKafkaReader {
                partition: partition.clone(),
                consumer: Some(consumer),
            }) as Box<dyn PartitionReader>)
        }
        .boxed()
    }
}

struct RdKafkaReader {
    partition: TopicPartition,

    /// Only `None` once dropped.
    consumer: Option<StreamConsumer>,
}

impl Debug for RdKafkaReader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdKafkaReader")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    let timestamp = msg
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default();
    Record::new(
        msg.topic(),
        msg.partition(),
        msg.offset(),
        Bytes::copy_from_slice(msg.key().unwrap_or_default()),
        Bytes::copy_from_slice(msg.payload().unwrap_or_default()),
        timestamp,
    )
}

impl PartitionReader for RdKafkaReader {
    fn next_record(&mut self, max_wait: Duration) -> BoxFuture<'_, Result<Option<Record>>> {
        async move {
            let consumer = self
                .consumer
                .as_ref()
                .ok_or_else(|| Error::unavailable("reader was released"))?;
            match tokio::time::timeout(max_wait, consumer.recv()).await {
                Err(_) => Ok(None),
                Ok(Err(e)) => Err(partition_error(&self.partition, e)),
                Ok(Ok(msg)) => Ok(Some(to_record(&msg))),
            }
        }
        .boxed()
    }
}

impl Drop for RdKafkaReader {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            drop_off_runtime(consumer);
        }
        debug!(partition = %self.partition, "released reader");
    }
}

/// Drops `value` on the blocking thread pool if called from within a runtime.
///
/// Closing a consumer waits for librdkafka to leave the partition.
fn drop_off_runtime<T: Send + 'static>(value: T) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || drop(value));
        }
        Err(_) => drop(value),
    }
}
