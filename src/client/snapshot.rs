//! Collects the best-effort state that lag and health aggregates are computed from.
//!
//! Every aggregate is computed from exactly one snapshot; nothing here is cached between requests.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::{
    task::JoinSet,
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::{
    client::{offsets::OffsetResolver, within},
    cluster::{ClusterAdmin, PartitionLog},
    error::Result,
    metadata::{ClusterMetadata, CommittedOffset, GroupDescription, OffsetWindow, TopicPartition},
    outcome::{Outcome, Skipped, partition_outcomes},
};

/// Topology, controller and broker liveness.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterState {
    pub metadata: ClusterMetadata,
    pub controller: Option<i32>,

    /// Roster brokers whose liveness probe succeeded.
    pub online: BTreeSet<i32>,
}

/// A consumer group and the offsets it committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOffsets {
    pub group: GroupDescription,
    pub committed: Vec<CommittedOffset>,
}

/// Committed offsets of all groups plus the high-water marks they are compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagSnapshot {
    pub groups: Vec<GroupOffsets>,

    /// Only partitions with a commit by at least one group whose window resolved.
    pub high_watermarks: BTreeMap<TopicPartition, i64>,

    pub skipped: Vec<Skipped>,
}

/// Offset windows of all partitions of a metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub windows: BTreeMap<TopicPartition, OffsetWindow>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug)]
pub struct SnapshotCollector {
    admin: Arc<dyn ClusterAdmin>,
    resolver: OffsetResolver,
    probe_timeout: Duration,
}

impl SnapshotCollector {
    pub fn new(
        admin: Arc<dyn ClusterAdmin>,
        log: Arc<dyn PartitionLog>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            admin,
            resolver: OffsetResolver::new(log),
            probe_timeout,
        }
    }

    /// Metadata, controller and the liveness of every roster broker.
    ///
    /// The controller lookup and the probes run side by side, bounded by the probe timeout. An unknown
    /// controller and failing probes degrade the snapshot, only missing metadata fails it.
    pub async fn cluster_state(&self, deadline: Instant) -> Result<ClusterState> {
        let metadata = within(deadline, "fetching metadata", self.admin.metadata(None)).await?;

        // the controller lookup shares the probe deadline
        let probe_deadline = deadline.min(Instant::now() + self.probe_timeout);
        let controller = async {
            match within(probe_deadline, "controller lookup", self.admin.controller_id()).await {
                Ok(controller) => controller,
                Err(e) => {
                    warn!(e = %e, "controller unknown");
                    None
                }
            }
        };
        let probes = join_all(metadata.brokers.iter().map(|broker| async move {
            let online = timeout_at(probe_deadline, self.admin.broker_online(broker))
                .await
                .unwrap_or_default();
            debug!(broker = broker.node_id, online, "probed broker");
            (broker.node_id, online)
        }));

        let (controller, probes) = futures::join!(controller, probes);
        let online = probes
            .into_iter()
            .filter_map(|(id, online)| online.then_some(id))
            .collect();

        Ok(ClusterState {
            metadata,
            controller,
            online,
        })
    }

    /// Windows of every partition of non-internal topics.
    pub async fn windows(&self, metadata: &ClusterMetadata, deadline: Instant) -> WindowSnapshot {
        let outcomes = self
            .resolver
            .resolve_windows(user_partitions(metadata), deadline)
            .await;
        let (resolved, skipped) = partition_outcomes(outcomes);
        WindowSnapshot {
            windows: resolved.into_iter().collect(),
            skipped,
        }
    }

    /// Committed offsets of every group and the current high-water marks of the committed partitions.
    pub async fn lag_snapshot(&self, deadline: Instant) -> Result<LagSnapshot> {
        let metadata = within(deadline, "fetching metadata", self.admin.metadata(None)).await?;
        let ids = within(deadline, "listing groups", self.admin.list_groups()).await?;
        let descriptions =
            within(deadline, "describing groups", self.admin.describe_groups(&ids)).await?;
        let partitions = user_partitions(&metadata);

        let mut tasks = JoinSet::new();
        for group in descriptions {
            let admin = Arc::clone(&self.admin);
            let partitions = partitions.clone();
            tasks.spawn(async move {
                let res = within(
                    deadline,
                    "fetching committed offsets",
                    admin.committed_offsets(&group.group_id, partitions),
                )
                .await;
                let target = format!("group {}", group.group_id);
                (group, Outcome::from_result(target, res))
            });
        }
        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(v) => outcomes.push(v),
                Err(e) => warn!(e = %e, "committed offset task failed"),
            }
        }
        let (resolved, mut skipped) = partition_outcomes(outcomes);

        let mut groups: Vec<_> = resolved
            .into_iter()
            .map(|(group, committed)| GroupOffsets {
                group,
                committed: committed
                    .into_iter()
                    .filter(|c| c.offset.is_some())
                    .collect(),
            })
            .collect();
        groups.sort_by(|a, b| a.group.group_id.cmp(&b.group.group_id));

        let committed: BTreeSet<_> = groups
            .iter()
            .flat_map(|g| g.committed.iter().map(|c| c.partition.clone()))
            .collect();
        let outcomes = self
            .resolver
            .resolve_windows(committed.into_iter().collect(), deadline)
            .await;
        let (windows, skipped_windows) = partition_outcomes(outcomes);
        skipped.extend(skipped_windows);

        Ok(LagSnapshot {
            groups,
            high_watermarks: windows
                .into_iter()
                .map(|(tp, window)| (tp, window.newest))
                .collect(),
            skipped,
        })
    }
}

fn user_partitions(metadata: &ClusterMetadata) -> Vec<TopicPartition> {
    metadata
        .topics
        .iter()
        .filter(|t| !t.is_internal)
        .flat_map(|t| {
            t.partitions
                .iter()
                .map(|p| TopicPartition::new(t.name.clone(), p.partition_index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::{backend::memory::MemoryCluster, error::Error};

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn collector(cluster: &Arc<MemoryCluster>) -> SnapshotCollector {
        SnapshotCollector::new(
            Arc::clone(cluster) as Arc<dyn ClusterAdmin>,
            Arc::clone(cluster) as Arc<dyn PartitionLog>,
            Duration::from_millis(100),
        )
    }

    fn cluster() -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_broker(1, "b1", 9092);
        cluster.add_broker(2, "b2", 9092);
        cluster.add_topic("orders", 2, 2).unwrap();
        cluster.add_topic("__consumer_offsets", 1, 1).unwrap();
        for _ in 0..10 {
            cluster.produce("orders", 0, "k", "v", Utc::now()).unwrap();
        }
        cluster
    }

    #[tokio::test]
    async fn test_cluster_state() {
        let cluster = cluster();
        cluster.set_broker_online(2, false);

        let state = collector(&cluster).cluster_state(deadline()).await.unwrap();
        assert_eq!(state.controller, Some(1));
        assert_eq!(state.online, BTreeSet::from([1]));
        assert_eq!(state.metadata.brokers.len(), 2);
    }

    #[tokio::test]
    async fn test_cluster_state_without_controller() {
        let cluster = cluster();
        cluster.set_controller_unavailable(true);

        let state = collector(&cluster).cluster_state(deadline()).await.unwrap();
        assert_eq!(state.controller, None);
    }

    #[tokio::test]
    async fn test_slow_controller_lookup_does_not_fail_probes() {
        let cluster = cluster();
        cluster.set_controller_delay(Some(Duration::from_secs(10)));
        cluster.set_probe_delay(Some(Duration::from_millis(5)));

        let deadline = Instant::now() + Duration::from_millis(200);
        let state = collector(&cluster).cluster_state(deadline).await.unwrap();
        assert_eq!(state.controller, None);
        assert_eq!(state.online, BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_cluster_state_timeout() {
        let cluster = cluster();
        cluster.set_metadata_delay(Some(Duration::from_secs(10)));

        let deadline = Instant::now() + Duration::from_millis(50);
        assert_matches!(
            collector(&cluster).cluster_state(deadline).await,
            Err(Error::DeadlineExceeded { .. })
        );
    }

    #[tokio::test]
    async fn test_windows_skip_internal() {
        let cluster = cluster();
        let state = collector(&cluster).cluster_state(deadline()).await.unwrap();
        let snapshot = collector(&cluster).windows(&state.metadata, deadline()).await;

        assert_eq!(snapshot.windows.len(), 2);
        assert_eq!(
            snapshot.windows[&TopicPartition::new("orders", 0)],
            OffsetWindow {
                oldest: 0,
                newest: 10
            }
        );
    }

    #[tokio::test]
    async fn test_lag_snapshot() {
        let cluster = cluster();
        cluster.add_group("g2", "Empty");
        cluster.add_group("g1", "Stable");
        cluster.add_group("broken", "Stable");
        cluster.commit("g1", "orders", 0, 7).unwrap();
        cluster.commit("g2", "orders", 1, 0).unwrap();
        cluster.commit("broken", "orders", 0, 1).unwrap();
        cluster.fail_group_offsets("broken");

        let snapshot = collector(&cluster).lag_snapshot(deadline()).await.unwrap();
        let ids: Vec<_> = snapshot.groups.iter().map(|g| g.group.group_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
        assert_eq!(snapshot.groups[0].committed.len(), 1);
        assert_eq!(snapshot.skipped.len(), 1);
        assert_eq!(snapshot.skipped[0].target, "group broken");
        assert_eq!(
            snapshot.high_watermarks,
            BTreeMap::from([
                (TopicPartition::new("orders", 0), 10),
                (TopicPartition::new("orders", 1), 0),
            ])
        );
    }
}
