//! Scatter-gather reads over all partitions of a topic.
//!
//! Every partition gets one task, bounded by the request deadline, that
//!
//! 1. resolves the offset window (and optionally a time anchor) of the partition
//! 2. scans the resulting range with a [`PartitionScanner`] unless it is empty
//!
//! Scans append to one shared accumulator. Filtering, ordering and truncation happen after the merge, so the
//! output does not depend on the order in which scans finish.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    task::JoinSet,
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::{
    client::{
        metadata::MetadataReader, offsets::OffsetResolver, scanner::PartitionScanner, within,
    },
    cluster::{ClusterAdmin, PartitionLog},
    config::InspectorConfig,
    error::{Error, Result},
    metadata::{OffsetWindow, TopicPartition},
    outcome::{Outcome, Skipped},
    record::{Record, ValueFormat},
    validation::{validate_offset_range, validate_partition},
};

/// Predicate applied to the merged records.
///
/// All criteria that are set must match. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,

    /// Substring that must occur in the key or the value.
    pub query: Option<String>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub format: Option<ValueFormat>,
}

impl MessageFilter {
    pub fn with_key(self, key: impl Into<Bytes>) -> Self {
        Self {
            key: Some(key.into()),
            ..self
        }
    }

    pub fn with_value(self, value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(value.into()),
            ..self
        }
    }

    pub fn with_query(self, query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..self
        }
    }

    pub fn with_start_time(self, start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            ..self
        }
    }

    pub fn with_end_time(self, end_time: DateTime<Utc>) -> Self {
        Self {
            end_time: Some(end_time),
            ..self
        }
    }

    pub fn with_format(self, format: ValueFormat) -> Self {
        Self {
            format: Some(format),
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(Error::invalid_argument(format!(
                    "start time {start} is after end time {end}"
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.key.as_ref().is_some_and(|k| k != &record.key) {
            return false;
        }
        if self.value.as_ref().is_some_and(|v| v != &record.value) {
            return false;
        }
        if self.start_time.is_some_and(|t| record.timestamp < t) {
            return false;
        }
        if self.end_time.is_some_and(|t| record.timestamp > t) {
            return false;
        }
        if self.format.is_some_and(|f| f != record.value_format()) {
            return false;
        }
        if let Some(query) = &self.query {
            let query = query.as_bytes();
            return contains(&record.key, query) || contains(&record.value, query);
        }
        true
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Offsets to replay, `[start, end)`, optionally restricted to one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OffsetRange {
    pub partition: Option<i32>,
    pub start: i64,
    pub end: i64,
}

/// Result of a topic read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fetched {
    /// Newest first, at most `limit` records.
    pub records: Vec<Record>,

    /// Partitions that did not contribute and why.
    pub skipped: Vec<Skipped>,

    /// Whether the deadline cut the read short.
    pub deadline_exceeded: bool,
}

/// Reads bounded slices of all partitions of a topic.
#[derive(Debug)]
pub struct MessageFetcher {
    metadata: MetadataReader,
    resolver: OffsetResolver,
    scanner: PartitionScanner,
    join_grace: Duration,
}

/// Which offsets of a partition to read, relative to its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPlan {
    /// The whole window.
    Window,

    /// From the first record at or after the given time.
    Since(DateTime<Utc>),

    /// The newest `n` offsets.
    Latest(i64),

    /// `[start, end)` clamped to the window.
    Range { start: i64, end: i64 },
}

impl ReadPlan {
    async fn offsets(
        self,
        resolver: &OffsetResolver,
        partition: &TopicPartition,
    ) -> Result<(i64, i64)> {
        if let Self::Since(at) = self {
            let (window, anchor) = resolver.resolve_window_at_time(partition, at).await?;
            return Ok((anchor.max(window.oldest), window.newest));
        }

        let window = resolver.resolve_window(partition).await?;
        Ok(match self {
            Self::Window | Self::Since(_) => (window.oldest, window.newest),
            Self::Latest(n) => (latest_start(window, n), window.newest),
            Self::Range { start, end } => (start.max(window.oldest), end.min(window.newest)),
        })
    }
}

/// Shared by all partition tasks of one read.
#[derive(Debug, Default)]
struct Accumulator {
    records: Vec<Record>,

    /// Partitions whose offsets were resolved, whether or not the scan finished.
    n_resolved: usize,
}

impl MessageFetcher {
    pub fn new(
        admin: Arc<dyn ClusterAdmin>,
        log: Arc<dyn PartitionLog>,
        config: &InspectorConfig,
    ) -> Self {
        Self {
            metadata: MetadataReader::new(admin),
            resolver: OffsetResolver::new(Arc::clone(&log)),
            scanner: PartitionScanner::new(log, config.read_timeout),
            join_grace: config.join_grace,
        }
    }

    /// Reads whole partition windows and returns the `limit` newest records that match `filter`.
    ///
    /// If the filter has a start time, every partition is read from the first offset at or after it.
    pub async fn fetch(
        &self,
        topic: &str,
        limit: usize,
        filter: Option<&MessageFilter>,
        deadline: Instant,
    ) -> Result<Fetched> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let partitions = self.list_partitions(topic, deadline).await?;
        let plan = match filter.and_then(|f| f.start_time) {
            Some(at) => ReadPlan::Since(at),
            None => ReadPlan::Window,
        };
        self.gather(partitions, plan, filter, limit, deadline).await
    }

    /// Reads the tail of every partition and returns the `limit` newest records.
    ///
    /// Every partition contributes at most `ceil(limit / partition_count)` records, so partitions with uneven
    /// traffic can leave the result short of `limit`.
    pub async fn fetch_latest(&self, topic: &str, limit: usize, deadline: Instant) -> Result<Fetched> {
        let partitions = self.list_partitions(topic, deadline).await?;
        let plan = ReadPlan::Latest(latest_share(limit, partitions.len()));
        self.gather(partitions, plan, None, limit, deadline).await
    }

    /// Reads `[range.start, range.end)` clamped to each partition's window.
    pub async fn fetch_range(
        &self,
        topic: &str,
        range: OffsetRange,
        limit: usize,
        deadline: Instant,
    ) -> Result<Fetched> {
        validate_offset_range(range.start, range.end)?;
        let mut partitions = self.list_partitions(topic, deadline).await?;
        if let Some(partition) = range.partition {
            validate_partition(partition)?;
            partitions.retain(|tp| tp.partition == partition);
            if partitions.is_empty() {
                return Err(Error::UnknownPartition {
                    topic: topic.to_owned(),
                    partition,
                });
            }
        }

        let plan = ReadPlan::Range {
            start: range.start,
            end: range.end,
        };
        self.gather(partitions, plan, None, limit, deadline).await
    }

    async fn list_partitions(&self, topic: &str, deadline: Instant) -> Result<Vec<TopicPartition>> {
        let topic = within(deadline, "listing partitions", self.metadata.topic(topic)).await?;
        Ok(topic
            .partitions
            .iter()
            .map(|p| TopicPartition::new(topic.name.clone(), p.partition_index))
            .collect())
    }

    /// Resolves and scans every partition in its own task.
    ///
    /// A partition starts scanning as soon as its offsets are known, so one slow partition does not hold back
    /// the others.
    async fn gather(
        &self,
        partitions: Vec<TopicPartition>,
        plan: ReadPlan,
        filter: Option<&MessageFilter>,
        limit: usize,
        deadline: Instant,
    ) -> Result<Fetched> {
        let n_partitions = partitions.len();
        let accumulator = Arc::new(Mutex::new(Accumulator::default()));

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(n_partitions);
        for tp in partitions {
            let resolver = self.resolver.clone();
            let scanner = self.scanner.clone();
            let accumulator = Arc::clone(&accumulator);
            let target = tp.clone();
            let handle = tasks.spawn(async move {
                let offsets =
                    within(deadline, "offset resolution", plan.offsets(&resolver, &tp)).await;
                let (start, end) = match Outcome::from_result(tp.to_string(), offsets) {
                    Outcome::Resolved(offsets) => offsets,
                    Outcome::Skipped(s) => return Some(s),
                };
                accumulator.lock().n_resolved += 1;

                let records = scanner.scan(&tp, start, end, deadline).await;
                match Outcome::from_result(tp.to_string(), records) {
                    Outcome::Resolved(records) => {
                        accumulator.lock().records.extend(records);
                        None
                    }
                    Outcome::Skipped(s) => Some(s),
                }
            });
            pending.insert(handle.id(), target);
        }

        // scans stop at the deadline themselves, the grace period only catches those that do not
        let backstop = deadline + self.join_grace;
        let mut skipped = vec![];
        loop {
            match timeout_at(backstop, tasks.join_next_with_id()).await {
                Ok(None) => break,
                Ok(Some(Ok((id, s)))) => {
                    pending.remove(&id);
                    skipped.extend(s);
                }
                Ok(Some(Err(e))) => {
                    if let Some(tp) = pending.remove(&e.id()) {
                        skipped.push(Skipped::new(tp.to_string(), format!("task failed: {e}")));
                    }
                }
                Err(_) => {
                    warn!(n_tasks = tasks.len(), "abandoning partitions past the deadline");
                    tasks.abort_all();
                    for tp in pending.into_values() {
                        skipped.push(Skipped::new(tp.to_string(), "abandoned past deadline"));
                    }
                    break;
                }
            }
        }
        skipped.sort_by(|a, b| a.target.cmp(&b.target));

        let Accumulator {
            records,
            n_resolved,
        } = std::mem::take(&mut *accumulator.lock());
        let deadline_exceeded = Instant::now() >= deadline;
        if n_partitions > 0 && n_resolved == 0 && deadline_exceeded {
            return Err(Error::DeadlineExceeded {
                operation: "resolving offsets",
            });
        }

        let n_read = records.len();
        let records = finalize(records, filter, limit);
        debug!(
            n_partitions,
            n_resolved,
            n_read,
            n_returned = records.len(),
            n_skipped = skipped.len(),
            deadline_exceeded,
            "fetch finished",
        );

        Ok(Fetched {
            records,
            skipped,
            deadline_exceeded,
        })
    }
}

/// Records per partition when reading the latest `limit` records.
fn latest_share(limit: usize, partition_count: usize) -> i64 {
    if partition_count == 0 {
        return 0;
    }
    i64::try_from(limit.div_ceil(partition_count)).unwrap_or(i64::MAX)
}

fn latest_start(window: OffsetWindow, share: i64) -> i64 {
    window.newest.saturating_sub(share).max(window.oldest)
}

/// Filters, orders and truncates the merged records.
pub(crate) fn finalize(
    mut records: Vec<Record>,
    filter: Option<&MessageFilter>,
    limit: usize,
) -> Vec<Record> {
    if let Some(filter) = filter {
        records.retain(|r| filter.matches(r));
    }
    records.sort_by(Record::presentation_cmp);
    records.truncate(limit);
    records
}
