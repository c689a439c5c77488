//! An in-memory cluster.
//!
//! [`MemoryCluster`] implements both capabilities on top of plain collections and lets callers inject the
//! failure modes a live cluster shows: unreachable or hung partitions, missing time indexes, failing offset
//! lookups and offline brokers. It backs the test suite and the benchmarks.
//!
//! # Usage
//! ```
//! # async fn test() {
//! use std::sync::Arc;
//! use kafkascope::backend::memory::{MemoryCluster, MemoryConnector};
//!
//! let cluster = Arc::new(MemoryCluster::new());
//! cluster.add_broker(0, "localhost", 9092);
//! cluster.add_topic("orders", 3, 1).unwrap();
//! cluster.produce("orders", 0, "k", "v", chrono::Utc::now()).unwrap();
//!
//! let connector = MemoryConnector::default().with_cluster("local", cluster);
//! # }
//! ```
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    backend::member_assignment,
    cluster::{ClusterAdmin, ClusterHandles, Connector, PartitionLog, PartitionReader},
    error::{Error, Result},
    metadata::{
        ClusterMetadata, CommittedOffset, GroupDescription, GroupMember, MetadataBroker,
        MetadataPartition, MetadataTopic, OffsetWindow, TopicPartition,
    },
    protocol::assignment::encode_member_assignment,
    record::Record,
};

#[derive(Debug)]
struct BrokerState {
    host: String,
    port: i32,
    online: bool,
    registered: bool,
}

#[derive(Debug)]
struct PartitionState {
    leader: Option<i32>,
    replicas: Vec<i32>,
    isr: Vec<i32>,
    log_start: i64,
    records: Vec<Record>,
}

impl PartitionState {
    fn window(&self) -> OffsetWindow {
        OffsetWindow {
            oldest: self.log_start,
            newest: self.log_start + self.records.len() as i64,
        }
    }
}

#[derive(Debug)]
struct MemberState {
    member_id: String,
    client_id: String,
    client_host: String,
    assignment: Bytes,
}

#[derive(Debug)]
struct GroupState {
    state: String,
    protocol: String,
    members: Vec<MemberState>,
    offsets: HashMap<TopicPartition, i64>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: HashSet<TopicPartition>,
    hung: HashSet<TopicPartition>,
    no_time_index: HashSet<TopicPartition>,
    failing_group_offsets: HashSet<String>,
    controller_unavailable: bool,
    metadata_delay: Option<Duration>,
    controller_delay: Option<Duration>,
    probe_delay: Option<Duration>,
    read_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    brokers: BTreeMap<i32, BrokerState>,
    controller: Option<i32>,
    topics: BTreeMap<String, Vec<PartitionState>>,
    groups: BTreeMap<String, GroupState>,
    faults: Faults,
}

impl State {
    fn partition(&self, tp: &TopicPartition) -> Result<&PartitionState> {
        let partitions = self
            .topics
            .get(&tp.topic)
            .ok_or_else(|| Error::UnknownTopic(tp.topic.clone()))?;
        usize::try_from(tp.partition)
            .ok()
            .and_then(|idx| partitions.get(idx))
            .ok_or_else(|| Error::UnknownPartition {
                topic: tp.topic.clone(),
                partition: tp.partition,
            })
    }

    fn partition_mut(&mut self, tp: &TopicPartition) -> Result<&mut PartitionState> {
        let partitions = self
            .topics
            .get_mut(&tp.topic)
            .ok_or_else(|| Error::UnknownTopic(tp.topic.clone()))?;
        usize::try_from(tp.partition)
            .ok()
            .and_then(|idx| partitions.get_mut(idx))
            .ok_or_else(|| Error::UnknownPartition {
                topic: tp.topic.clone(),
                partition: tp.partition,
            })
    }

    /// Checks a partition is known and reachable.
    fn reachable(&self, tp: &TopicPartition) -> Result<&PartitionState> {
        let partition = self.partition(tp)?;
        if self.faults.unreachable.contains(tp) {
            return Err(Error::Unavailable(format!(
                "leader of {tp} is not reachable"
            )));
        }
        Ok(partition)
    }

    fn group(&self, group_id: &str) -> Result<&GroupState> {
        self.groups
            .get(group_id)
            .ok_or_else(|| Error::UnknownGroup(group_id.to_owned()))
    }

    fn group_mut(&mut self, group_id: &str) -> Result<&mut GroupState> {
        self.groups
            .get_mut(group_id)
            .ok_or_else(|| Error::UnknownGroup(group_id.to_owned()))
    }

    fn topic_metadata(&self, name: &str, partitions: &[PartitionState]) -> MetadataTopic {
        MetadataTopic {
            name: name.to_owned(),
            is_internal: name.starts_with("__"),
            partitions: partitions
                .iter()
                .zip(0..)
                .map(|(p, partition_index)| MetadataPartition {
                    partition_index,
                    leader_id: p.leader,
                    replica_nodes: p.replicas.clone(),
                    isr_nodes: p.isr.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
    open_readers: AtomicUsize,
}

/// In-memory cluster with fault injection.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    shared: Arc<Shared>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a broker. The first broker becomes the controller.
    pub fn add_broker(&self, node_id: i32, host: impl Into<String>, port: i32) {
        let mut state = self.shared.state.write();
        state.brokers.insert(
            node_id,
            BrokerState {
                host: host.into(),
                port,
                online: true,
                registered: true,
            },
        );
        state.controller.get_or_insert(node_id);
    }

    /// Marks a broker as (un)reachable. It stays in the roster.
    pub fn set_broker_online(&self, node_id: i32, online: bool) {
        if let Some(broker) = self.shared.state.write().brokers.get_mut(&node_id) {
            broker.online = online;
        }
    }

    /// Removes a broker from the roster, e.g. after it crashed. Replica sets still reference it.
    pub fn deregister_broker(&self, node_id: i32) {
        let mut state = self.shared.state.write();
        if let Some(broker) = state.brokers.get_mut(&node_id) {
            broker.registered = false;
            broker.online = false;
        }
        if state.controller == Some(node_id) {
            state.controller = None;
        }
    }

    pub fn set_controller(&self, node_id: Option<i32>) {
        self.shared.state.write().controller = node_id;
    }

    /// Makes the controller lookup fail.
    pub fn set_controller_unavailable(&self, unavailable: bool) {
        self.shared.state.write().faults.controller_unavailable = unavailable;
    }

    /// Creates a topic, placing replicas round-robin over the registered brokers.
    pub fn add_topic(
        &self,
        name: &str,
        num_partitions: i32,
        replication_factor: i16,
    ) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.topics.contains_key(name) {
            return Err(Error::invalid_argument(format!(
                "topic \"{name}\" already exists"
            )));
        }

        let brokers: Vec<i32> = state
            .brokers
            .iter()
            .filter(|(_, b)| b.registered)
            .map(|(id, _)| *id)
            .collect();
        let replication_factor = usize::try_from(replication_factor).unwrap_or_default();
        if replication_factor == 0 || replication_factor > brokers.len() {
            return Err(Error::invalid_argument(format!(
                "replication factor {replication_factor} not possible with {} brokers",
                brokers.len()
            )));
        }
        let num_partitions = usize::try_from(num_partitions).unwrap_or_default();
        if num_partitions == 0 {
            return Err(Error::invalid_argument("topic needs at least one partition"));
        }

        let partitions = (0..num_partitions)
            .map(|p| {
                let replicas: Vec<i32> = (0..replication_factor)
                    .map(|r| brokers[(p + r) % brokers.len()])
                    .collect();
                PartitionState {
                    leader: replicas.first().copied(),
                    isr: replicas.clone(),
                    replicas,
                    log_start: 0,
                    records: vec![],
                }
            })
            .collect();
        state.topics.insert(name.to_owned(), partitions);
        debug!(topic = name, num_partitions, replication_factor, "created topic");
        Ok(())
    }

    /// Appends a record and returns its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let tp = TopicPartition::new(topic, partition);
        let mut state = self.shared.state.write();
        let p = state.partition_mut(&tp)?;
        let offset = p.window().newest;
        p.records.push(Record::new(
            topic,
            partition,
            offset,
            key.into(),
            value.into(),
            timestamp,
        ));
        Ok(offset)
    }

    /// Drops all records below `offset`, like retention or `DeleteRecords` would.
    pub fn truncate_before(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let tp = TopicPartition::new(topic, partition);
        let mut state = self.shared.state.write();
        let p = state.partition_mut(&tp)?;
        let window = p.window();
        let offset = offset.clamp(window.oldest, window.newest);
        let n = usize::try_from(offset - window.oldest).unwrap_or_default();
        p.records.drain(..n);
        p.log_start = offset;
        Ok(())
    }

    pub fn set_isr(&self, topic: &str, partition: i32, isr: Vec<i32>) -> Result<()> {
        let tp = TopicPartition::new(topic, partition);
        self.shared.state.write().partition_mut(&tp)?.isr = isr;
        Ok(())
    }

    pub fn set_leader(&self, topic: &str, partition: i32, leader: Option<i32>) -> Result<()> {
        let tp = TopicPartition::new(topic, partition);
        self.shared.state.write().partition_mut(&tp)?.leader = leader;
        Ok(())
    }

    /// Makes watermark lookups and reads of a partition fail.
    pub fn set_partition_unreachable(&self, topic: &str, partition: i32) {
        let tp = TopicPartition::new(topic, partition);
        self.shared.state.write().faults.unreachable.insert(tp);
    }

    /// Makes watermark lookups and reads of a partition never complete.
    pub fn set_partition_hung(&self, topic: &str, partition: i32) {
        let tp = TopicPartition::new(topic, partition);
        self.shared.state.write().faults.hung.insert(tp);
    }

    /// Makes time-to-offset lookups of a partition fail.
    pub fn remove_time_index(&self, topic: &str, partition: i32) {
        let tp = TopicPartition::new(topic, partition);
        self.shared.state.write().faults.no_time_index.insert(tp);
    }

    /// Delay applied to every metadata request.
    pub fn set_metadata_delay(&self, delay: Option<Duration>) {
        self.shared.state.write().faults.metadata_delay = delay;
    }

    /// Delay applied to every controller lookup.
    pub fn set_controller_delay(&self, delay: Option<Duration>) {
        self.shared.state.write().faults.controller_delay = delay;
    }

    /// Delay applied to every broker liveness probe.
    pub fn set_probe_delay(&self, delay: Option<Duration>) {
        self.shared.state.write().faults.probe_delay = delay;
    }

    /// Delay applied to every record read.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.shared.state.write().faults.read_delay = delay;
    }

    pub fn add_group(&self, group_id: &str, state: &str) {
        self.shared.state.write().groups.insert(
            group_id.to_owned(),
            GroupState {
                state: state.to_owned(),
                protocol: "range".to_owned(),
                members: vec![],
                offsets: HashMap::new(),
            },
        );
    }

    /// Adds a consumer group member with the given assignment.
    pub fn add_member(
        &self,
        group_id: &str,
        member_id: &str,
        assignment: &BTreeMap<String, Vec<i32>>,
    ) -> Result<()> {
        let data = encode_member_assignment(assignment).map_err(Error::unavailable)?;
        self.add_member_raw(group_id, member_id, data)
    }

    /// Adds a consumer group member with an arbitrary assignment blob.
    pub fn add_member_raw(
        &self,
        group_id: &str,
        member_id: &str,
        assignment: impl Into<Bytes>,
    ) -> Result<()> {
        let mut state = self.shared.state.write();
        state.group_mut(group_id)?.members.push(MemberState {
            member_id: member_id.to_owned(),
            client_id: format!("{member_id}-client"),
            client_host: "/127.0.0.1".to_owned(),
            assignment: assignment.into(),
        });
        Ok(())
    }

    /// Commits `offset` for a group. A negative offset, like Kafka's `-1`, clears the commit.
    pub fn commit(&self, group_id: &str, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.shared.state.write();
        let offsets = &mut state.group_mut(group_id)?.offsets;
        let tp = TopicPartition::new(topic, partition);
        if offset < 0 {
            offsets.remove(&tp);
        } else {
            offsets.insert(tp, offset);
        }
        Ok(())
    }

    /// Makes committed offset lookups of a group fail.
    pub fn fail_group_offsets(&self, group_id: &str) {
        self.shared
            .state
            .write()
            .faults
            .failing_group_offsets
            .insert(group_id.to_owned());
    }

    /// Number of readers that were opened and not yet released.
    pub fn open_readers(&self) -> usize {
        self.shared.open_readers.load(Ordering::SeqCst)
    }

    fn is_hung(&self, tp: &TopicPartition) -> bool {
        self.shared.state.read().faults.hung.contains(tp)
    }
}

impl ClusterAdmin for MemoryCluster {
    fn metadata(&self, topics: Option<Vec<String>>) -> BoxFuture<'_, Result<ClusterMetadata>> {
        async move {
            let delay = self.shared.state.read().faults.metadata_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let state = self.shared.state.read();
            let brokers = state
                .brokers
                .iter()
                .filter(|(_, b)| b.registered)
                .map(|(id, b)| MetadataBroker {
                    node_id: *id,
                    host: b.host.clone(),
                    port: b.port,
                })
                .collect();

            let topics = match topics {
                None => state
                    .topics
                    .iter()
                    .map(|(name, partitions)| state.topic_metadata(name, partitions))
                    .collect(),
                Some(names) => names
                    .iter()
                    .map(|name| {
                        state
                            .topics
                            .get(name)
                            .map(|partitions| state.topic_metadata(name, partitions))
                            .ok_or_else(|| Error::UnknownTopic(name.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?,
            };

            Ok(ClusterMetadata { brokers, topics })
        }
        .boxed()
    }

    fn controller_id(&self) -> BoxFuture<'_, Result<Option<i32>>> {
        async move {
            let delay = self.shared.state.read().faults.controller_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let state = self.shared.state.read();
            if state.faults.controller_unavailable {
                return Err(Error::unavailable("controller lookup failed"));
            }
            Ok(state.controller)
        }
        .boxed()
    }

    fn broker_online<'a>(&'a self, broker: &'a MetadataBroker) -> BoxFuture<'a, bool> {
        async move {
            let delay = self.shared.state.read().faults.probe_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.shared
                .state
                .read()
                .brokers
                .get(&broker.node_id)
                .map(|b| b.online)
                .unwrap_or_default()
        }
        .boxed()
    }

    fn list_groups(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        async move { Ok(self.shared.state.read().groups.keys().cloned().collect()) }.boxed()
    }

    fn describe_groups<'a>(
        &'a self,
        group_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<GroupDescription>>> {
        async move {
            let state = self.shared.state.read();
            Ok(group_ids
                .iter()
                .filter_map(|id| state.groups.get(id).map(|g| (id, g)))
                .map(|(group_id, g)| GroupDescription {
                    group_id: group_id.clone(),
                    state: g.state.clone(),
                    protocol: g.protocol.clone(),
                    protocol_type: "consumer".to_owned(),
                    members: g
                        .members
                        .iter()
                        .map(|m| GroupMember {
                            member_id: m.member_id.clone(),
                            client_id: m.client_id.clone(),
                            client_host: m.client_host.clone(),
                            assignment: member_assignment(group_id, &m.member_id, &m.assignment),
                        })
                        .collect(),
                })
                .collect())
        }
        .boxed()
    }

    fn committed_offsets<'a>(
        &'a self,
        group_id: &'a str,
        partitions: Vec<TopicPartition>,
    ) -> BoxFuture<'a, Result<Vec<CommittedOffset>>> {
        async move {
            let state = self.shared.state.read();
            let group = state.group(group_id)?;
            if state.faults.failing_group_offsets.contains(group_id) {
                return Err(Error::Unavailable(format!(
                    "coordinator of group \"{group_id}\" is not available"
                )));
            }
            Ok(partitions
                .into_iter()
                .map(|partition| CommittedOffset {
                    offset: group.offsets.get(&partition).copied(),
                    partition,
                })
                .collect())
        }
        .boxed()
    }

    fn create_topic<'a>(
        &'a self,
        name: &'a str,
        num_partitions: i32,
        replication_factor: i16,
    ) -> BoxFuture<'a, Result<()>> {
        async move { self.add_topic(name, num_partitions, replication_factor) }.boxed()
    }

    fn delete_topic<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut state = self.shared.state.write();
            state
                .topics
                .remove(name)
                .ok_or_else(|| Error::UnknownTopic(name.to_owned()))?;
            for group in state.groups.values_mut() {
                group.offsets.retain(|tp, _| tp.topic != name);
            }
            debug!(topic = name, "deleted topic");
            Ok(())
        }
        .boxed()
    }
}

impl PartitionLog for MemoryCluster {
    fn watermarks<'a>(
        &'a self,
        partition: &'a TopicPartition,
    ) -> BoxFuture<'a, Result<OffsetWindow>> {
        async move {
            if self.is_hung(partition) {
                futures::future::pending::<()>().await;
            }
            Ok(self.shared.state.read().reachable(partition)?.window())
        }
        .boxed()
    }

    fn offset_for_time<'a>(
        &'a self,
        partition: &'a TopicPartition,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<i64>>> {
        async move {
            let state = self.shared.state.read();
            let p = state.reachable(partition)?;
            if state.faults.no_time_index.contains(partition) {
                return Err(Error::Unavailable(format!(
                    "no time index for {partition}"
                )));
            }
            Ok(p.records
                .iter()
                .find(|r| r.timestamp >= at)
                .map(|r| r.offset))
        }
        .boxed()
    }

    fn open_reader<'a>(
        &'a self,
        partition: &'a TopicPartition,
        start_offset: i64,
    ) -> BoxFuture<'a, Result<Box<dyn PartitionReader>>> {
        async move {
            if self.is_hung(partition) {
                futures::future::pending::<()>().await;
            }
            self.shared.state.read().reachable(partition)?;

            self.shared.open_readers.fetch_add(1, Ordering::SeqCst);
            debug!(%partition, start_offset, "opened reader");
            Ok(Box::new(MemoryReader {
                shared: Arc::clone(&self.shared),
                partition: partition.clone(),
                next_offset: start_offset,
            }) as Box<dyn PartitionReader>)
        }
        .boxed()
    }
}

#[derive(Debug)]
struct MemoryReader {
    shared: Arc<Shared>,
    partition: TopicPartition,
    next_offset: i64,
}

impl PartitionReader for MemoryReader {
    fn next_record(&mut self, max_wait: Duration) -> BoxFuture<'_, Result<Option<Record>>> {
        async move {
            let delay = self.shared.state.read().faults.read_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let record = {
                let state = self.shared.state.read();
                let p = state.reachable(&self.partition)?;
                let skip = usize::try_from(self.next_offset - p.log_start).unwrap_or_default();
                p.records.get(skip).cloned()
            };

            match record {
                Some(record) => {
                    self.next_offset = record.offset + 1;
                    Ok(Some(record))
                }
                None => {
                    tokio::time::sleep(max_wait).await;
                    Ok(None)
                }
            }
        }
        .boxed()
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.shared.open_readers.fetch_sub(1, Ordering::SeqCst);
        debug!(partition = %self.partition, "released reader");
    }
}

/// Connects cluster names to [`MemoryCluster`]s.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    clusters: RwLock<HashMap<String, Arc<MemoryCluster>>>,
}

impl MemoryConnector {
    pub fn with_cluster(self, name: impl Into<String>, cluster: Arc<MemoryCluster>) -> Self {
        self.clusters.write().insert(name.into(), cluster);
        self
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, cluster_name: &str, _bootstrap_brokers: &[String]) -> Result<ClusterHandles> {
        let cluster = self
            .clusters
            .read()
            .get(cluster_name)
            .map(Arc::clone)
            .ok_or_else(|| {
                Error::Unavailable(format!("no in-memory cluster named \"{cluster_name}\""))
            })?;
        Ok(ClusterHandles {
            admin: Arc::clone(&cluster) as Arc<dyn ClusterAdmin>,
            log: cluster as Arc<dyn PartitionLog>,
        })
    }
}
