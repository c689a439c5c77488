use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::{
    cluster::{ClusterAdmin, ClusterHandles, Connector, PartitionLog},
    error::{Error, Result},
};

/// A registered cluster and the handles used to reach it.
#[derive(Debug)]
pub struct Cluster {
    name: String,
    bootstrap_brokers: Vec<String>,
    handles: ClusterHandles,
}

impl Cluster {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bootstrap_brokers(&self) -> &[String] {
        &self.bootstrap_brokers
    }

    pub(crate) fn admin(&self) -> &Arc<dyn ClusterAdmin> {
        &self.handles.admin
    }

    pub(crate) fn log(&self) -> &Arc<dyn PartitionLog> {
        &self.handles.log
    }
}

/// Name and brokers of a registered cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub name: String,
    pub bootstrap_brokers: Vec<String>,
}

/// Named clusters, shared by all requests.
///
/// Lookups vastly outnumber changes, hence the read-write lock. Handles are connected before the lock is
/// taken, so a slow connect never blocks lookups.
#[derive(Debug)]
pub struct ClusterRegistry {
    connector: Arc<dyn Connector>,
    clusters: RwLock<HashMap<String, Arc<Cluster>>>,
}

impl ClusterRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            clusters: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a cluster. An existing cluster of the same name is replaced.
    pub fn add(&self, name: &str, bootstrap_brokers: Vec<String>) -> Result<Arc<Cluster>> {
        if name.is_empty() {
            return Err(Error::invalid_argument("cluster name must not be empty"));
        }
        if bootstrap_brokers.is_empty() {
            return Err(Error::invalid_argument(format!(
                "cluster \"{name}\" needs at least one bootstrap broker"
            )));
        }

        let handles = self.connector.connect(name, &bootstrap_brokers)?;
        let cluster = Arc::new(Cluster {
            name: name.to_owned(),
            bootstrap_brokers,
            handles,
        });

        let replaced = self
            .clusters
            .write()
            .insert(name.to_owned(), Arc::clone(&cluster))
            .is_some();
        info!(
            cluster = name,
            brokers = ?cluster.bootstrap_brokers,
            replaced,
            "registered cluster",
        );
        Ok(cluster)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        match self.clusters.write().remove(name) {
            Some(_) => {
                info!(cluster = name, "removed cluster");
                Ok(())
            }
            None => Err(Error::UnknownCluster(name.to_owned())),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Cluster>> {
        self.clusters
            .read()
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| Error::UnknownCluster(name.to_owned()))
    }

    /// All registered clusters, sorted by name.
    pub fn list(&self) -> Vec<ClusterInfo> {
        let mut clusters: Vec<_> = self
            .clusters
            .read()
            .values()
            .map(|c| ClusterInfo {
                name: c.name.clone(),
                bootstrap_brokers: c.bootstrap_brokers.clone(),
            })
            .collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }
}
