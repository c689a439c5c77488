//! Cluster health, broker and topic roll-ups over a [`ClusterState`].
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{
    client::snapshot::{ClusterState, WindowSnapshot},
    metadata::TopicPartition,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterHealthSnapshot {
    /// Brokers in the roster plus brokers only referenced by replica sets.
    pub total_brokers: usize,
    pub online_brokers: usize,
    pub total_topics: usize,
    pub total_partitions: usize,
    pub under_replicated: usize,
    pub offline_replicas: usize,
    pub controller_id: Option<i32>,

    /// All brokers online and every replica in sync. An unknown controller does not affect this.
    pub is_healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerMetrics {
    pub id: i32,

    /// `None` for brokers that are missing from the roster.
    pub host: Option<String>,
    pub port: Option<i32>,

    pub is_controller: bool,
    pub is_online: bool,
    pub leader_count: usize,
    pub replica_count: usize,

    /// Out-of-sync replicas of the partitions this broker leads.
    pub offline_replicas: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicMetrics {
    pub name: String,
    pub partition_count: usize,
    pub replication_factor: usize,

    /// Sum of the window lengths of all partitions that could be resolved.
    pub retained_messages: i64,

    pub under_replicated: usize,
    pub offline_replicas: usize,
}

/// IDs of all brokers the snapshot knows about.
fn known_brokers(state: &ClusterState) -> BTreeSet<i32> {
    state
        .metadata
        .brokers
        .iter()
        .map(|b| b.node_id)
        .chain(
            state
                .metadata
                .topics
                .iter()
                .flat_map(|t| t.partitions.iter())
                .flat_map(|p| p.replica_nodes.iter().copied()),
        )
        .collect()
}

pub fn cluster_health(state: &ClusterState) -> ClusterHealthSnapshot {
    let partitions = || state.metadata.topics.iter().flat_map(|t| t.partitions.iter());

    let total_brokers = known_brokers(state).len();
    let online_brokers = state.online.len();
    let under_replicated = partitions().filter(|p| p.is_under_replicated()).count();
    let offline_replicas: usize = partitions().map(|p| p.offline_replica_count()).sum();

    ClusterHealthSnapshot {
        total_brokers,
        online_brokers,
        total_topics: state.metadata.topics.len(),
        total_partitions: partitions().count(),
        under_replicated,
        offline_replicas,
        controller_id: state.controller,
        is_healthy: online_brokers == total_brokers
            && under_replicated == 0
            && offline_replicas == 0,
    }
}

/// Per broker metrics sorted by ID.
pub fn broker_metrics(state: &ClusterState) -> Vec<BrokerMetrics> {
    let roster: BTreeMap<i32, _> = state
        .metadata
        .brokers
        .iter()
        .map(|b| (b.node_id, b))
        .collect();
    let partitions: Vec<_> = state
        .metadata
        .topics
        .iter()
        .flat_map(|t| t.partitions.iter())
        .collect();

    known_brokers(state)
        .into_iter()
        .map(|id| {
            let led = partitions.iter().filter(|p| p.leader_id == Some(id));
            BrokerMetrics {
                id,
                host: roster.get(&id).map(|b| b.host.clone()),
                port: roster.get(&id).map(|b| b.port),
                is_controller: state.controller == Some(id),
                is_online: state.online.contains(&id),
                leader_count: led.clone().count(),
                replica_count: partitions
                    .iter()
                    .filter(|p| p.replica_nodes.contains(&id))
                    .count(),
                offline_replicas: led.map(|p| p.offline_replica_count()).sum(),
            }
        })
        .collect()
}

/// Per topic metrics of non-internal topics, sorted by name.
pub fn topic_metrics(state: &ClusterState, windows: &WindowSnapshot) -> Vec<TopicMetrics> {
    let mut metrics: Vec<_> = state
        .metadata
        .topics
        .iter()
        .filter(|t| !t.is_internal)
        .map(|t| TopicMetrics {
            name: t.name.clone(),
            partition_count: t.partitions.len(),
            replication_factor: t.replication_factor(),
            retained_messages: t
                .partitions
                .iter()
                .filter_map(|p| {
                    windows
                        .windows
                        .get(&TopicPartition::new(t.name.clone(), p.partition_index))
                })
                .map(|w| w.len())
                .sum(),
            under_replicated: t.partitions.iter().filter(|p| p.is_under_replicated()).count(),
            offline_replicas: t.partitions.iter().map(|p| p.offline_replica_count()).sum(),
        })
        .collect();
    metrics.sort_by(|a, b| a.name.cmp(&b.name));
    metrics
}
