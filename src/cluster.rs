//! Capabilities through which a Kafka cluster is reached.
//!
//! Everything in [`client`](crate::client) talks to Kafka only through these traits, so a backend (see
//! [`backend`](crate::backend)) can be swapped for an in-memory one in tests.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::{
    error::Result,
    metadata::{
        ClusterMetadata, CommittedOffset, GroupDescription, MetadataBroker, OffsetWindow,
        TopicPartition,
    },
    record::Record,
};

/// Metadata and admin operations of a cluster.
pub trait ClusterAdmin: std::fmt::Debug + Send + Sync {
    /// Fetch cluster metadata.
    ///
    /// If `topics` is `Some` only the named topics are described; a name that does not exist results in
    /// [`Error::UnknownTopic`](crate::error::Error::UnknownTopic).
    fn metadata(&self, topics: Option<Vec<String>>) -> BoxFuture<'_, Result<ClusterMetadata>>;

    /// ID of the controller broker, `None` if the cluster does not report one.
    fn controller_id(&self) -> BoxFuture<'_, Result<Option<i32>>>;

    /// Whether a connection to the given broker can be established right now.
    fn broker_online<'a>(&'a self, broker: &'a MetadataBroker) -> BoxFuture<'a, bool>;

    /// IDs of all consumer groups.
    fn list_groups(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Describe the given groups. Groups unknown to the cluster are omitted from the result.
    fn describe_groups<'a>(
        &'a self,
        group_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<GroupDescription>>>;

    /// Offsets `group_id` committed for each of `partitions`.
    fn committed_offsets<'a>(
        &'a self,
        group_id: &'a str,
        partitions: Vec<TopicPartition>,
    ) -> BoxFuture<'a, Result<Vec<CommittedOffset>>>;

    fn create_topic<'a>(
        &'a self,
        name: &'a str,
        num_partitions: i32,
        replication_factor: i16,
    ) -> BoxFuture<'a, Result<()>>;

    fn delete_topic<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Partition scoped log operations.
pub trait PartitionLog: std::fmt::Debug + Send + Sync {
    /// Oldest readable offset and high-water mark of a partition.
    fn watermarks<'a>(&'a self, partition: &'a TopicPartition)
    -> BoxFuture<'a, Result<OffsetWindow>>;

    /// First offset whose record timestamp is at or after `at`.
    ///
    /// Returns `None` if no such record exists.
    fn offset_for_time<'a>(
        &'a self,
        partition: &'a TopicPartition,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<i64>>>;

    /// Open a read connection to a partition, positioned at `start_offset`.
    fn open_reader<'a>(
        &'a self,
        partition: &'a TopicPartition,
        start_offset: i64,
    ) -> BoxFuture<'a, Result<Box<dyn PartitionReader>>>;
}

/// A read connection to one partition.
///
/// The connection is released when the reader is dropped.
pub trait PartitionReader: std::fmt::Debug + Send {
    /// Wait up to `max_wait` for the next record.
    ///
    /// `Ok(None)` means nothing arrived in time, i.e. the reader caught up with the log.
    fn next_record(&mut self, max_wait: Duration) -> BoxFuture<'_, Result<Option<Record>>>;
}

/// Both capabilities of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterHandles {
    pub admin: Arc<dyn ClusterAdmin>,
    pub log: Arc<dyn PartitionLog>,
}

/// Creates [`ClusterHandles`] for a list of bootstrap brokers.
pub trait Connector: std::fmt::Debug + Send + Sync {
    fn connect(&self, cluster_name: &str, bootstrap_brokers: &[String]) -> Result<ClusterHandles>;
}
