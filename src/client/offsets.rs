use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{task::JoinSet, time::Instant};
use tracing::{trace, warn};

use crate::{
    client::within,
    cluster::PartitionLog,
    error::{Error, Result},
    metadata::{OffsetWindow, TopicPartition},
    outcome::Outcome,
};

/// Resolves offset windows and time anchors of partitions.
///
/// Nothing is cached; every call asks the cluster.
#[derive(Debug, Clone)]
pub struct OffsetResolver {
    log: Arc<dyn PartitionLog>,
}

impl OffsetResolver {
    pub fn new(log: Arc<dyn PartitionLog>) -> Self {
        Self { log }
    }

    /// Oldest and newest offset of a partition.
    pub async fn resolve_window(&self, partition: &TopicPartition) -> Result<OffsetWindow> {
        let window = self.log.watermarks(partition).await?;
        if window.oldest < 0 || window.oldest > window.newest {
            return Err(Error::InvalidResponse(format!(
                "inconsistent watermarks for {partition}: oldest={} newest={}",
                window.oldest, window.newest
            )));
        }
        trace!(%partition, oldest = window.oldest, newest = window.newest, "resolved window");
        Ok(window)
    }

    /// First offset whose timestamp is at or after `at`, within the window.
    ///
    /// If no record is that recent this is the newest offset. If the partition cannot answer time queries this
    /// falls back to the oldest offset.
    pub async fn resolve_at_time(
        &self,
        partition: &TopicPartition,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let (_window, anchor) = self.resolve_window_at_time(partition, at).await?;
        Ok(anchor)
    }

    /// Window of a partition and the offset [`resolve_at_time`](Self::resolve_at_time) anchors at.
    pub async fn resolve_window_at_time(
        &self,
        partition: &TopicPartition,
        at: DateTime<Utc>,
    ) -> Result<(OffsetWindow, i64)> {
        let window = self.resolve_window(partition).await?;
        let anchor = self.anchor_in(partition, window, at).await;
        Ok((window, anchor))
    }

    async fn anchor_in(
        &self,
        partition: &TopicPartition,
        window: OffsetWindow,
        at: DateTime<Utc>,
    ) -> i64 {
        match self.log.offset_for_time(partition, at).await {
            Ok(Some(offset)) => offset.clamp(window.oldest, window.newest),
            Ok(None) => window.newest,
            Err(e) => {
                warn!(
                    %partition,
                    %at,
                    e = %e,
                    "time lookup failed, falling back to oldest offset",
                );
                window.oldest
            }
        }
    }

    /// Resolves the windows of many partitions in parallel.
    ///
    /// Partitions that fail or miss the deadline end up as [`Outcome::Skipped`]. Results are sorted by partition.
    pub async fn resolve_windows(
        &self,
        partitions: Vec<TopicPartition>,
        deadline: Instant,
    ) -> Vec<(TopicPartition, Outcome<OffsetWindow>)> {
        let mut tasks = JoinSet::new();
        for tp in partitions {
            let resolver = self.clone();
            tasks.spawn(async move {
                let res = within(deadline, "offset resolution", resolver.resolve_window(&tp)).await;
                let outcome = Outcome::from_result(tp.to_string(), res);
                (tp, outcome)
            });
        }

        let mut resolved = Vec::with_capacity(tasks.len());
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(v) => resolved.push(v),
                Err(e) => warn!(e = %e, "offset resolution task failed"),
            }
        }
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        resolved
    }
}
