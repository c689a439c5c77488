//! Consumer lag roll-ups over a [`LagSnapshot`].
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{client::snapshot::GroupOffsets, client::snapshot::LagSnapshot, metadata::TopicPartition};

/// State of a group whose members agreed on an assignment.
const STABLE_GROUP_STATE: &str = "Stable";

/// Lag of one group on one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LagEntry {
    pub group_id: String,
    pub topic: String,
    pub total_lag: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerGroupMetrics {
    pub group_id: String,
    pub state: String,
    pub member_count: usize,

    /// Topics the group is assigned to or committed offsets for.
    pub topic_count: usize,

    /// Topics the group lags behind on, highest lag first.
    pub topic_lags: Vec<LagEntry>,

    pub total_lag: i64,

    /// Integer mean over [`topic_lags`](Self::topic_lags), zero if there is no lag.
    pub avg_lag: i64,

    pub max_lag: i64,
    pub is_stable: bool,
}

/// How far a committed offset trails the high-water mark. Never negative.
pub fn partition_lag(committed: i64, high_watermark: i64) -> i64 {
    (high_watermark - committed).max(0)
}

/// Per topic lag of one group.
///
/// Partitions without a commit or without a known high-water mark do not contribute. Topics without lag are
/// omitted.
fn group_lag(
    group: &GroupOffsets,
    high_watermarks: &BTreeMap<TopicPartition, i64>,
) -> Vec<LagEntry> {
    let mut by_topic: BTreeMap<&str, i64> = BTreeMap::new();
    for committed in &group.committed {
        let Some(offset) = committed.offset else {
            continue;
        };
        let Some(hwm) = high_watermarks.get(&committed.partition) else {
            continue;
        };
        *by_topic.entry(committed.partition.topic.as_str()).or_default() +=
            partition_lag(offset, *hwm);
    }

    let mut entries: Vec<_> = by_topic
        .into_iter()
        .filter(|(_, lag)| *lag > 0)
        .map(|(topic, total_lag)| LagEntry {
            group_id: group.group.group_id.clone(),
            topic: topic.to_owned(),
            total_lag,
        })
        .collect();
    sort_entries(&mut entries);
    entries
}

fn sort_entries(entries: &mut [LagEntry]) {
    entries.sort_by(|a, b| {
        b.total_lag
            .cmp(&a.total_lag)
            .then_with(|| a.group_id.cmp(&b.group_id))
            .then_with(|| a.topic.cmp(&b.topic))
    });
}

/// Lag of every group on every topic, highest lag first.
pub fn lag_entries(snapshot: &LagSnapshot) -> Vec<LagEntry> {
    let mut entries: Vec<_> = snapshot
        .groups
        .iter()
        .flat_map(|g| group_lag(g, &snapshot.high_watermarks))
        .collect();
    sort_entries(&mut entries);
    entries
}

/// Metrics of every group, highest total lag first.
pub fn group_metrics(snapshot: &LagSnapshot) -> Vec<ConsumerGroupMetrics> {
    let mut metrics: Vec<_> = snapshot
        .groups
        .iter()
        .map(|g| {
            let topic_lags = group_lag(g, &snapshot.high_watermarks);
            let total_lag = topic_lags.iter().map(|e| e.total_lag).sum();
            let max_lag = topic_lags.iter().map(|e| e.total_lag).max().unwrap_or_default();
            let avg_lag = i64::try_from(topic_lags.len())
                .ok()
                .filter(|n| *n > 0)
                .map(|n| total_lag / n)
                .unwrap_or_default();

            let topics: BTreeSet<&str> = g
                .group
                .assigned_topics()
                .into_iter()
                .chain(g.committed.iter().map(|c| c.partition.topic.as_str()))
                .collect();

            ConsumerGroupMetrics {
                group_id: g.group.group_id.clone(),
                state: g.group.state.clone(),
                member_count: g.group.members.len(),
                topic_count: topics.len(),
                topic_lags,
                total_lag,
                avg_lag,
                max_lag,
                is_stable: g.group.state == STABLE_GROUP_STATE,
            }
        })
        .collect();
    metrics.sort_by(|a, b| {
        b.total_lag
            .cmp(&a.total_lag)
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    metrics
}
