use std::future::Future;
use std::sync::Arc;

use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::{
    client::{
        fetcher::{Fetched, MessageFetcher, MessageFilter, OffsetRange},
        health::{BrokerMetrics, ClusterHealthSnapshot, TopicMetrics},
        lag::{ConsumerGroupMetrics, LagEntry},
        metadata::{BrokerSummary, MetadataReader, TopicDetails, TopicSummary},
        registry::{Cluster, ClusterInfo, ClusterRegistry},
        snapshot::SnapshotCollector,
    },
    cluster::Connector,
    config::InspectorConfig,
    error::{Error, Result},
    metadata::GroupDescription,
    outcome::Partial,
    validation::resolve_limit,
};

pub mod fetcher;
pub mod health;
pub mod lag;
pub mod metadata;
pub mod offsets;
pub mod registry;
pub mod scanner;
pub mod snapshot;

/// Runs `fut` unless the deadline passes first.
pub(crate) async fn within<T, F>(deadline: Instant, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout_at(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::DeadlineExceeded { operation }),
    }
}

/// Builder for [`Inspector`].
pub struct InspectorBuilder {
    connector: Arc<dyn Connector>,
    config: InspectorConfig,
}

impl InspectorBuilder {
    /// Create a new [`InspectorBuilder`] that reaches clusters through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            config: InspectorConfig::default(),
        }
    }

    /// Set timeouts and limits.
    pub fn with_config(mut self, config: InspectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build [`Inspector`].
    pub fn build(self) -> Inspector {
        Inspector {
            registry: ClusterRegistry::new(self.connector),
            config: self.config,
        }
    }
}

impl std::fmt::Debug for InspectorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectorBuilder").finish_non_exhaustive()
    }
}

/// Read-mostly view on a set of named Kafka clusters.
///
/// Every request gets its own deadline of [`InspectorConfig::request_timeout`]. Nothing is cached across
/// requests apart from the connections held by the cluster registry.
#[derive(Debug)]
pub struct Inspector {
    registry: ClusterRegistry,
    config: InspectorConfig,
}

impl Inspector {
    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Register a cluster, replacing an existing one of the same name.
    pub fn add_cluster(&self, name: &str, bootstrap_brokers: Vec<String>) -> Result<()> {
        self.registry.add(name, bootstrap_brokers)?;
        Ok(())
    }

    pub fn remove_cluster(&self, name: &str) -> Result<()> {
        self.registry.remove(name)
    }

    /// Registered clusters sorted by name.
    pub fn list_clusters(&self) -> Vec<ClusterInfo> {
        self.registry.list()
    }

    /// Topics of a cluster sorted by name. Internal topics are only included if asked for.
    pub async fn topics(&self, cluster: &str, include_internal: bool) -> Result<Vec<TopicSummary>> {
        let reader = self.metadata_reader(cluster)?;
        within(
            self.deadline(),
            "listing topics",
            reader.list_topics(include_internal),
        )
        .await
    }

    pub async fn topic(&self, cluster: &str, topic: &str) -> Result<TopicDetails> {
        let reader = self.metadata_reader(cluster)?;
        within(self.deadline(), "describing topic", reader.describe_topic(topic)).await
    }

    pub async fn create_topic(
        &self,
        cluster: &str,
        topic: &str,
        num_partitions: i32,
        replication_factor: i16,
    ) -> Result<()> {
        let reader = self.metadata_reader(cluster)?;
        within(
            self.deadline(),
            "creating topic",
            reader.create_topic(topic, num_partitions, replication_factor),
        )
        .await
    }

    pub async fn delete_topic(&self, cluster: &str, topic: &str) -> Result<()> {
        let reader = self.metadata_reader(cluster)?;
        within(self.deadline(), "deleting topic", reader.delete_topic(topic)).await
    }

    /// Broker roster sorted by ID.
    pub async fn brokers(&self, cluster: &str) -> Result<Vec<BrokerSummary>> {
        let reader = self.metadata_reader(cluster)?;
        within(self.deadline(), "listing brokers", reader.list_brokers()).await
    }

    /// Consumer groups sorted by ID.
    pub async fn consumer_groups(&self, cluster: &str) -> Result<Vec<GroupDescription>> {
        let reader = self.metadata_reader(cluster)?;
        within(self.deadline(), "listing groups", reader.list_groups()).await
    }

    pub async fn consumer_group(&self, cluster: &str, group_id: &str) -> Result<GroupDescription> {
        let reader = self.metadata_reader(cluster)?;
        within(self.deadline(), "describing group", reader.describe_group(group_id)).await
    }

    /// Up to `limit` of the newest records of a topic that match `filter`.
    ///
    /// See [`MessageFetcher::fetch`].
    pub async fn messages(
        &self,
        cluster: &str,
        topic: &str,
        limit: Option<usize>,
        filter: Option<&MessageFilter>,
    ) -> Result<Fetched> {
        let deadline = self.deadline();
        let limit = self.limit(limit)?;
        self.fetcher(cluster)?
            .fetch(topic, limit, filter, deadline)
            .await
    }

    /// Up to `limit` of the newest records of a topic, read from the tail of every partition.
    ///
    /// See [`MessageFetcher::fetch_latest`].
    pub async fn latest_messages(
        &self,
        cluster: &str,
        topic: &str,
        limit: Option<usize>,
    ) -> Result<Fetched> {
        let deadline = self.deadline();
        let limit = self.limit(limit)?;
        self.fetcher(cluster)?
            .fetch_latest(topic, limit, deadline)
            .await
    }

    /// Records in an offset range, of one or all partitions.
    ///
    /// See [`MessageFetcher::fetch_range`].
    pub async fn messages_in_range(
        &self,
        cluster: &str,
        topic: &str,
        range: OffsetRange,
        limit: Option<usize>,
    ) -> Result<Fetched> {
        let deadline = self.deadline();
        let limit = self.limit(limit)?;
        self.fetcher(cluster)?
            .fetch_range(topic, range, limit, deadline)
            .await
    }

    /// Lag of every consumer group on every topic it lags behind on, highest lag first.
    ///
    /// Groups whose committed offsets could not be read are reported as skipped.
    pub async fn group_lag(&self, cluster: &str) -> Result<Partial<LagEntry>> {
        let deadline = self.deadline();
        let snapshot = self.collector(cluster)?.lag_snapshot(deadline).await?;
        Ok(Partial {
            items: lag::lag_entries(&snapshot),
            skipped: snapshot.skipped,
        })
    }

    pub async fn group_metrics(&self, cluster: &str) -> Result<Partial<ConsumerGroupMetrics>> {
        let deadline = self.deadline();
        let snapshot = self.collector(cluster)?.lag_snapshot(deadline).await?;
        Ok(Partial {
            items: lag::group_metrics(&snapshot),
            skipped: snapshot.skipped,
        })
    }

    pub async fn cluster_health(&self, cluster: &str) -> Result<ClusterHealthSnapshot> {
        let deadline = self.deadline();
        let state = self.collector(cluster)?.cluster_state(deadline).await?;
        Ok(health::cluster_health(&state))
    }

    pub async fn broker_metrics(&self, cluster: &str) -> Result<Vec<BrokerMetrics>> {
        let deadline = self.deadline();
        let state = self.collector(cluster)?.cluster_state(deadline).await?;
        Ok(health::broker_metrics(&state))
    }

    /// Metrics of every non-internal topic. Partitions whose window did not resolve are reported as skipped.
    pub async fn topic_metrics(&self, cluster: &str) -> Result<Partial<TopicMetrics>> {
        let deadline = self.deadline();
        let collector = self.collector(cluster)?;
        let state = collector.cluster_state(deadline).await?;
        let windows = collector.windows(&state.metadata, deadline).await;
        debug!(
            n_windows = windows.windows.len(),
            n_skipped = windows.skipped.len(),
            "resolved topic windows",
        );
        Ok(Partial {
            items: health::topic_metrics(&state, &windows),
            skipped: windows.skipped,
        })
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.request_timeout
    }

    fn limit(&self, limit: Option<usize>) -> Result<usize> {
        resolve_limit(limit, self.config.default_limit, self.config.max_limit)
    }

    fn cluster(&self, name: &str) -> Result<Arc<Cluster>> {
        self.registry.get(name)
    }

    fn metadata_reader(&self, cluster: &str) -> Result<MetadataReader> {
        let cluster = self.cluster(cluster)?;
        Ok(MetadataReader::new(Arc::clone(cluster.admin())))
    }

    fn fetcher(&self, cluster: &str) -> Result<MessageFetcher> {
        let cluster = self.cluster(cluster)?;
        Ok(MessageFetcher::new(
            Arc::clone(cluster.admin()),
            Arc::clone(cluster.log()),
            &self.config,
        ))
    }

    fn collector(&self, cluster: &str) -> Result<SnapshotCollector> {
        let cluster = self.cluster(cluster)?;
        Ok(SnapshotCollector::new(
            Arc::clone(cluster.admin()),
            Arc::clone(cluster.log()),
            self.config.probe_timeout,
        ))
    }
}
