//! Cluster registry
//!
//! Single owner of the name → connection table. Lookups take the read lock and
//! never block each other; registration probes the cluster first and only
//! then takes the write lock to swap the entry in.

use super::client::{ClusterClients, ClusterConnector};
use super::error::{K8sError, K8sResult};
use super::types::{ClusterConfig, ClusterInfo};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// One registered cluster and its client handles
pub struct ClusterConnection {
    config: ClusterConfig,
    clients: ClusterClients,
    info: ClusterInfo,
    closed: watch::Sender<bool>,
}

impl ClusterConnection {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClusterClients {
        &self.clients
    }

    pub fn info(&self) -> &ClusterInfo {
        &self.info
    }

    /// Fires once the connection is removed, replaced or shut down
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn shutdown(&self) {
        self.closed.send_replace(true);
    }
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("name", &self.config.name)
            .field("endpoint", &self.info.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Name → connection table shared by every request
pub struct ClusterRegistry {
    connector: Arc<dyn ClusterConnector>,
    clusters: RwLock<IndexMap<String, Arc<ClusterConnection>>>,
    probe_timeout: Duration,
}

impl ClusterRegistry {
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            connector,
            clusters: RwLock::new(IndexMap::new()),
            probe_timeout: Duration::from_secs(15),
        }
    }

    /// Validate, probe, then install. Any failure leaves the table untouched.
    pub async fn register(&self, config: ClusterConfig) -> K8sResult<ClusterInfo> {
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(K8sError::Validation(violations));
        }

        let connected = tokio::time::timeout(self.probe_timeout, self.connector.connect(&config))
            .await
            .map_err(|_| K8sError::Connect {
                cluster: config.name.clone(),
                message: format!("probe timed out after {:?}", self.probe_timeout),
            })??;

        let info = ClusterInfo {
            name: config.name.clone(),
            endpoint: connected.endpoint,
            insecure_skip_verify: config.insecure_skip_verify,
            server_version: connected.server_version,
            registered_at: chrono::Utc::now().to_rfc3339(),
        };
        let (closed, _) = watch::channel(false);
        let connection = Arc::new(ClusterConnection {
            config,
            clients: connected.clients,
            info: info.clone(),
            closed,
        });

        let previous = {
            let mut clusters = self.clusters.write().await;
            clusters.insert(info.name.clone(), connection)
        };

        match previous {
            Some(prev) => {
                tracing::warn!(
                    cluster = %info.name,
                    old_endpoint = %prev.info.endpoint,
                    new_endpoint = %info.endpoint,
                    "Cluster re-registered; replacing existing connection"
                );
                prev.shutdown();
            }
            None => {
                tracing::info!(
                    cluster = %info.name,
                    endpoint = %info.endpoint,
                    version = info.server_version.as_deref().unwrap_or("unknown"),
                    "Registered cluster"
                );
            }
        }

        Ok(info)
    }

    pub async fn get(&self, name: &str) -> K8sResult<Arc<ClusterConnection>> {
        let clusters = self.clusters.read().await;
        clusters
            .get(name)
            .cloned()
            .ok_or_else(|| K8sError::ClusterNotFound(name.to_string()))
    }

    /// Cluster names in registration order
    pub async fn list_names(&self) -> Vec<String> {
        let clusters = self.clusters.read().await;
        clusters.keys().cloned().collect()
    }

    pub async fn list(&self) -> Vec<ClusterInfo> {
        let clusters = self.clusters.read().await;
        clusters.values().map(|c| c.info.clone()).collect()
    }

    pub async fn info(&self, name: &str) -> K8sResult<ClusterInfo> {
        Ok(self.get(name).await?.info.clone())
    }

    pub async fn len(&self) -> usize {
        self.clusters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clusters.read().await.is_empty()
    }

    /// Unregister a cluster and end its watches
    pub async fn remove(&self, name: &str) -> K8sResult<ClusterInfo> {
        let removed = {
            let mut clusters = self.clusters.write().await;
            clusters.shift_remove(name)
        };
        let connection = removed.ok_or_else(|| K8sError::ClusterNotFound(name.to_string()))?;
        connection.shutdown();
        tracing::info!(cluster = %name, "Removed cluster");
        Ok(connection.info.clone())
    }

    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<ClusterConnection>> = {
            let mut clusters = self.clusters.write().await;
            clusters.drain(..).map(|(_, c)| c).collect()
        };
        for connection in &drained {
            connection.shutdown();
        }
        tracing::info!(clusters = drained.len(), "All cluster connections shut down");
    }
}
