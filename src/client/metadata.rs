use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    cluster::ClusterAdmin,
    error::{Error, Result},
    metadata::{GroupDescription, MetadataTopic},
    validation::ExactlyOne,
};

/// State a coordinator reports for a group that no longer exists.
const DEAD_GROUP_STATE: &str = "Dead";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub partition_count: usize,
    pub replication_factor: usize,
    pub is_internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionDetails {
    pub id: i32,
    pub leader: Option<i32>,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicDetails {
    pub name: String,
    pub replication_factor: usize,
    pub partitions: Vec<PartitionDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerSummary {
    pub id: i32,
    pub host: String,
    pub port: i32,
    pub is_controller: bool,
}

/// Enumeration and describe queries on top of the admin capability.
#[derive(Debug)]
pub struct MetadataReader {
    admin: Arc<dyn ClusterAdmin>,
}

impl MetadataReader {
    pub fn new(admin: Arc<dyn ClusterAdmin>) -> Self {
        Self { admin }
    }

    /// Topics sorted by name.
    pub async fn list_topics(&self, include_internal: bool) -> Result<Vec<TopicSummary>> {
        let md = self.admin.metadata(None).await?;
        let mut topics: Vec<_> = md
            .topics
            .iter()
            .filter(|t| include_internal || !t.is_internal)
            .map(|t| TopicSummary {
                name: t.name.clone(),
                partition_count: t.partitions.len(),
                replication_factor: t.replication_factor(),
                is_internal: t.is_internal,
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    /// Metadata of a single topic, partitions sorted by index.
    pub async fn topic(&self, name: &str) -> Result<MetadataTopic> {
        let md = self.admin.metadata(Some(vec![name.to_owned()])).await?;
        let mut topic = md.topics.exactly_one().map_err(|n| {
            Error::InvalidResponse(format!("expected metadata of one topic, got {n}"))
        })?;
        if topic.name != name {
            return Err(Error::InvalidResponse(format!(
                "asked for topic \"{name}\", got \"{}\"",
                topic.name
            )));
        }
        topic.partitions.sort_by_key(|p| p.partition_index);
        Ok(topic)
    }

    pub async fn describe_topic(&self, name: &str) -> Result<TopicDetails> {
        let topic = self.topic(name).await?;
        Ok(TopicDetails {
            replication_factor: topic.replication_factor(),
            partitions: topic
                .partitions
                .iter()
                .map(|p| PartitionDetails {
                    id: p.partition_index,
                    leader: p.leader_id,
                    replicas: p.replica_nodes.clone(),
                    isr: p.isr_nodes.clone(),
                    offline_replicas: p.offline_replicas(),
                })
                .collect(),
            name: topic.name,
        })
    }

    pub async fn create_topic(
        &self,
        name: &str,
        num_partitions: i32,
        replication_factor: i16,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("topic name must not be empty"));
        }
        if num_partitions < 1 {
            return Err(Error::invalid_argument(format!(
                "topic needs at least one partition, got {num_partitions}"
            )));
        }
        if replication_factor < 1 {
            return Err(Error::invalid_argument(format!(
                "replication factor must be at least 1, got {replication_factor}"
            )));
        }

        self.admin
            .create_topic(name, num_partitions, replication_factor)
            .await?;
        info!(topic = name, num_partitions, replication_factor, "topic created");
        Ok(())
    }

    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("topic name must not be empty"));
        }
        self.admin.delete_topic(name).await?;
        info!(topic = name, "topic deleted");
        Ok(())
    }

    /// Broker roster sorted by ID.
    ///
    /// A failing controller lookup degrades to no broker being flagged as controller.
    pub async fn list_brokers(&self) -> Result<Vec<BrokerSummary>> {
        let md = self.admin.metadata(None).await?;
        if md.brokers.is_empty() {
            return Err(Error::unavailable("cluster reported no brokers"));
        }

        let controller = self.admin.controller_id().await.unwrap_or_else(|e| {
            warn!(e = %e, "cannot determine controller");
            None
        });

        let mut brokers: Vec<_> = md
            .brokers
            .into_iter()
            .map(|b| BrokerSummary {
                is_controller: controller == Some(b.node_id),
                id: b.node_id,
                host: b.host,
                port: b.port,
            })
            .collect();
        brokers.sort_by_key(|b| b.id);
        Ok(brokers)
    }

    /// All consumer groups sorted by ID.
    pub async fn list_groups(&self) -> Result<Vec<GroupDescription>> {
        let ids = self.admin.list_groups().await?;
        let mut groups = self.admin.describe_groups(&ids).await?;
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Ok(groups)
    }

    pub async fn describe_group(&self, group_id: &str) -> Result<GroupDescription> {
        let ids = [group_id.to_owned()];
        self.admin
            .describe_groups(&ids)
            .await?
            .into_iter()
            .find(|g| g.group_id == group_id && g.state != DEAD_GROUP_STATE)
            .ok_or_else(|| Error::UnknownGroup(group_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::backend::memory::MemoryCluster;

    fn reader() -> (Arc<MemoryCluster>, MetadataReader) {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_broker(2, "b2", 9092);
        cluster.add_broker(1, "b1", 9092);
        cluster.add_topic("payments", 1, 2).unwrap();
        cluster.add_topic("orders", 3, 1).unwrap();
        cluster.add_topic("__consumer_offsets", 1, 1).unwrap();
        let reader = MetadataReader::new(Arc::clone(&cluster) as Arc<dyn ClusterAdmin>);
        (cluster, reader)
    }

    #[tokio::test]
    async fn test_list_topics() {
        let (_cluster, reader) = reader();

        let names: Vec<_> = reader
            .list_topics(false)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["orders", "payments"]);

        let all = reader.list_topics(true).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].is_internal);
        assert_eq!(all[2].replication_factor, 2);
    }

    #[tokio::test]
    async fn test_describe_topic() {
        let (cluster, reader) = reader();
        cluster.set_isr("payments", 0, vec![2]).unwrap();

        let details = reader.describe_topic("payments").await.unwrap();
        assert_eq!(details.replication_factor, 2);
        assert_eq!(details.partitions[0].offline_replicas, vec![1]);

        assert_matches!(
            reader.describe_topic("nope").await,
            Err(Error::UnknownTopic(_))
        );
    }

    #[tokio::test]
    async fn test_create_delete_topic() {
        let (_cluster, reader) = reader();
        assert_matches!(
            reader.create_topic("", 1, 1).await,
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            reader.create_topic("t", 0, 1).await,
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            reader.create_topic("t", 1, 0).await,
            Err(Error::InvalidArgument(_))
        );

        reader.create_topic("t", 2, 1).await.unwrap();
        assert_eq!(reader.topic("t").await.unwrap().partitions.len(), 2);
        reader.delete_topic("t").await.unwrap();
        assert_matches!(reader.delete_topic("t").await, Err(Error::UnknownTopic(_)));
    }

    #[tokio::test]
    async fn test_list_brokers() {
        let (cluster, reader) = reader();
        let brokers = reader.list_brokers().await.unwrap();
        assert_eq!(brokers.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 2]);
        // first registered broker
        assert!(brokers[1].is_controller);

        cluster.set_controller_unavailable(true);
        let brokers = reader.list_brokers().await.unwrap();
        assert!(brokers.iter().all(|b| !b.is_controller));
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let cluster = Arc::new(MemoryCluster::new());
        let reader = MetadataReader::new(cluster);
        assert_matches!(reader.list_brokers().await, Err(Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_groups() {
        let (cluster, reader) = reader();
        cluster.add_group("g2", "Stable");
        cluster.add_group("g1", "Empty");
        cluster.add_group("gone", "Dead");
        cluster
            .add_member("g2", "m1", &BTreeMap::from([("orders".to_owned(), vec![2])]))
            .unwrap();

        let ids: Vec<_> = reader
            .list_groups()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.group_id)
            .collect();
        assert_eq!(ids, vec!["g1", "g2", "gone"]);

        let g2 = reader.describe_group("g2").await.unwrap();
        assert_eq!(g2.members[0].assignment["orders"], vec![2]);

        assert_matches!(reader.describe_group("gone").await, Err(Error::UnknownGroup(_)));
        assert_matches!(reader.describe_group("nope").await, Err(Error::UnknownGroup(_)));
    }
}
