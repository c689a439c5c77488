//! Cluster-wide Kafka metadata as reported by the admin capability.
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Identifies a log shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Readable offsets of a partition at one point in time.
///
/// This is a snapshot and stale the moment it is returned; it is never cached across requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OffsetWindow {
    /// First readable offset.
    pub oldest: i64,

    /// High-water mark, i.e. one past the last readable offset.
    pub newest: i64,
}

impl OffsetWindow {
    /// Number of offsets in the window.
    pub fn len(&self) -> i64 {
        self.newest - self.oldest
    }

    pub fn is_empty(&self) -> bool {
        self.oldest >= self.newest
    }
}

/// Metadata container for the entire cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMetadata {
    /// Brokers currently registered with the cluster.
    pub brokers: Vec<MetadataBroker>,

    /// Topics.
    pub topics: Vec<MetadataTopic>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&MetadataTopic> {
        self.topics.iter().find(|t| t.name == name)
    }
}

/// Metadata for a certain broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBroker {
    /// The broker ID
    pub node_id: i32,

    /// The broker hostname
    pub host: String,

    /// The broker port
    pub port: i32,
}

/// Metadata for a certain topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTopic {
    /// The topic name
    pub name: String,

    /// True if the topic is internal
    pub is_internal: bool,

    /// Each partition in the topic
    pub partitions: Vec<MetadataPartition>,
}

impl MetadataTopic {
    /// Replica count of the first partition, assuming a uniform replication factor.
    pub fn replication_factor(&self) -> usize {
        self.partitions
            .first()
            .map(|p| p.replica_nodes.len())
            .unwrap_or_default()
    }
}

/// Metadata for a certain partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPartition {
    /// The partition index
    pub partition_index: i32,

    /// The ID of the leader broker, if there is one
    pub leader_id: Option<i32>,

    /// The set of all nodes that host this partition
    pub replica_nodes: Vec<i32>,

    /// The set of all nodes that are in sync with the leader for this partition
    pub isr_nodes: Vec<i32>,
}

impl MetadataPartition {
    pub fn is_under_replicated(&self) -> bool {
        self.replica_nodes.len() != self.isr_nodes.len()
    }

    /// Number of replicas that are not in sync.
    pub fn offline_replica_count(&self) -> usize {
        self.replica_nodes.len().saturating_sub(self.isr_nodes.len())
    }

    /// Replicas that are not in sync.
    pub fn offline_replicas(&self) -> Vec<i32> {
        self.replica_nodes
            .iter()
            .filter(|r| !self.isr_nodes.contains(r))
            .copied()
            .collect()
    }
}

/// A consumer group as reported by its coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDescription {
    pub group_id: String,
    pub state: String,
    pub protocol: String,
    pub protocol_type: String,
    pub members: Vec<GroupMember>,
}

impl GroupDescription {
    /// Distinct topics assigned to any member.
    pub fn assigned_topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self
            .members
            .iter()
            .flat_map(|m| m.assignment.keys().map(String::as_str))
            .collect();
        topics.sort_unstable();
        topics.dedup();
        topics
    }
}

/// A member of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,

    /// Assigned partitions by topic. Empty if the assignment could not be decoded.
    pub assignment: BTreeMap<String, Vec<i32>>,
}

/// Offset a consumer group committed for a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOffset {
    pub partition: TopicPartition,

    /// `None` if the group never committed for this partition.
    pub offset: Option<i64>,
}
