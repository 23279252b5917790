//! Kubernetes client handles
//!
//! A registered cluster owns three handles: a typed client for the built-in
//! kinds the quota validator reads, a dynamic client addressing any kind by
//! its descriptor, and a metrics-server client. Each is a trait so the
//! registry can be fed by kube-rs or by the in-memory cluster in tests.

use super::error::{K8sError, K8sResult};
use super::resolver::ResourceDescriptor;
use super::types::{ClusterConfig, Credential};
use async_trait::async_trait;
use base64::Engine;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{LimitRange, ResourceQuota};
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, Preconditions,
    WatchEvent, WatchParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use kubegate_common::{ContainerMetrics, NodeMetrics, PodMetrics};
use std::sync::Arc;
use std::time::Duration;

/// Paging and filtering for a list call
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub label_selector: Option<String>,
}

/// One page of raw objects
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub items: Vec<DynamicObject>,
    pub continue_token: Option<String>,
    /// Collection resource version the page was served at
    pub resource_version: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Some(0) skips graceful termination
    pub grace_period_seconds: Option<u32>,
    /// Only delete the object carrying this UID
    pub precondition_uid: Option<String>,
}

/// Change reported by an upstream watch
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    /// Progress marker carrying only a resource version
    Bookmark(String),
}

pub type UpstreamEventStream = BoxStream<'static, K8sResult<UpstreamEvent>>;

/// Kind-agnostic access through the resolver's descriptors
#[async_trait]
pub trait DynamicApi: Send + Sync {
    async fn list(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> K8sResult<ObjectPage>;

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> K8sResult<Option<DynamicObject>>;

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject>;

    /// Replace; a resourceVersion on `object` makes the write conditional
    async fn replace(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject>;

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        options: &DeleteOptions,
    ) -> K8sResult<()>;

    /// Set replicas through the scale subresource
    async fn scale(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        replicas: i32,
        resource_version: Option<&str>,
    ) -> K8sResult<()>;

    /// Events strictly after `resource_version`
    async fn watch(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> K8sResult<UpstreamEventStream>;
}

/// Typed reads of the built-in admission policy objects
#[async_trait]
pub trait TypedApi: Send + Sync {
    async fn resource_quotas(&self, namespace: &str) -> K8sResult<Vec<ResourceQuota>>;
    async fn limit_ranges(&self, namespace: &str) -> K8sResult<Vec<LimitRange>>;
}

/// metrics.k8s.io readings
#[async_trait]
pub trait MetricsApi: Send + Sync {
    async fn node_metrics(&self) -> K8sResult<Vec<NodeMetrics>>;
    async fn pod_metrics(&self, namespace: &str) -> K8sResult<Vec<PodMetrics>>;
}

/// The three handles a registered cluster owns
#[derive(Clone)]
pub struct ClusterClients {
    pub typed: Arc<dyn TypedApi>,
    pub dynamic: Arc<dyn DynamicApi>,
    pub metrics: Arc<dyn MetricsApi>,
}

impl std::fmt::Debug for ClusterClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClients").finish_non_exhaustive()
    }
}

/// Outcome of a successful connect + probe
#[derive(Debug, Clone)]
pub struct ConnectedCluster {
    pub clients: ClusterClients,
    /// API server URL actually in use
    pub endpoint: String,
    pub server_version: Option<String>,
}

/// Builds client handles for a cluster config and probes connectivity
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, config: &ClusterConfig) -> K8sResult<ConnectedCluster>;
}

/// kube-rs backed client implementing all three handle traits
#[derive(Clone)]
pub struct KubeClient {
    inner: Client,
    watch_timeout_secs: u32,
}

impl KubeClient {
    pub fn new(inner: Client, watch_timeout_secs: u32) -> Self {
        Self {
            inner,
            watch_timeout_secs,
        }
    }

    fn api(&self, descriptor: &ResourceDescriptor, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = descriptor.api_resource();
        match descriptor.scope(namespace) {
            Some(ns) => Api::namespaced_with(self.inner.clone(), ns, &ar),
            None => Api::all_with(self.inner.clone(), &ar),
        }
    }

    async fn get_json(&self, uri: String) -> K8sResult<serde_json::Value> {
        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .body(vec![])
            .map_err(|e| K8sError::Internal(e.to_string()))?;

        self.inner
            .request(request)
            .await
            .map_err(|e| K8sError::from_kube(e, "metrics.k8s.io", true))
    }
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("watch_timeout_secs", &self.watch_timeout_secs)
            .finish()
    }
}

#[async_trait]
impl DynamicApi for KubeClient {
    async fn list(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> K8sResult<ObjectPage> {
        let mut params = ListParams::default();
        if let Some(limit) = options.limit {
            params = params.limit(limit);
        }
        if let Some(token) = &options.continue_token {
            params = params.continue_token(token);
        }
        if let Some(selector) = &options.label_selector {
            params = params.labels(selector);
        }

        let list = self
            .api(descriptor, namespace)
            .list(&params)
            .await
            .map_err(|e| K8sError::from_kube(e, descriptor.kind, true))?;

        Ok(ObjectPage {
            items: list.items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> K8sResult<Option<DynamicObject>> {
        self.api(descriptor, namespace)
            .get_opt(name)
            .await
            .map_err(|e| K8sError::from_kube(e, descriptor.kind, false))
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject> {
        self.api(descriptor, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| K8sError::from_kube(e, descriptor.kind, false))
    }

    async fn replace(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject> {
        self.api(descriptor, namespace)
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| K8sError::from_kube(e, descriptor.kind, false))
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        options: &DeleteOptions,
    ) -> K8sResult<()> {
        let params = DeleteParams {
            grace_period_seconds: options.grace_period_seconds,
            preconditions: options.precondition_uid.clone().map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };

        match self.api(descriptor, namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) => Err(match K8sError::from_kube(e, descriptor.kind, false) {
                // UID precondition mismatches come back as 409
                K8sError::Conflict(msg) => K8sError::Precondition(msg),
                other => other,
            }),
        }
    }

    async fn scale(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        replicas: i32,
        resource_version: Option<&str>,
    ) -> K8sResult<()> {
        let mut patch = serde_json::json!({ "spec": { "replicas": replicas } });
        if let Some(rv) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }

        self.api(descriptor, namespace)
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| K8sError::from_kube(e, descriptor.kind, false))
    }

    async fn watch(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> K8sResult<UpstreamEventStream> {
        let params = WatchParams::default().timeout(self.watch_timeout_secs);
        let kind = descriptor.kind;

        let stream = self
            .api(descriptor, namespace)
            .watch(&params, resource_version)
            .await
            .map_err(|e| K8sError::from_kube(e, kind, true))?;

        Ok(stream
            .map(move |event| match event {
                Ok(WatchEvent::Added(obj)) => Ok(UpstreamEvent::Added(obj)),
                Ok(WatchEvent::Modified(obj)) => Ok(UpstreamEvent::Modified(obj)),
                Ok(WatchEvent::Deleted(obj)) => Ok(UpstreamEvent::Deleted(obj)),
                Ok(WatchEvent::Bookmark(bookmark)) => {
                    Ok(UpstreamEvent::Bookmark(bookmark.metadata.resource_version))
                }
                Ok(WatchEvent::Error(resp)) => {
                    Err(K8sError::from_kube(kube::Error::Api(resp), kind, true))
                }
                Err(e) => Err(K8sError::from_kube(e, kind, true)),
            })
            .boxed())
    }
}

#[async_trait]
impl TypedApi for KubeClient {
    async fn resource_quotas(&self, namespace: &str) -> K8sResult<Vec<ResourceQuota>> {
        let api: Api<ResourceQuota> = Api::namespaced(self.inner.clone(), namespace);
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| K8sError::from_kube(e, "ResourceQuota", true))
    }

    async fn limit_ranges(&self, namespace: &str) -> K8sResult<Vec<LimitRange>> {
        let api: Api<LimitRange> = Api::namespaced(self.inner.clone(), namespace);
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| K8sError::from_kube(e, "LimitRange", true))
    }
}

#[async_trait]
impl MetricsApi for KubeClient {
    async fn node_metrics(&self) -> K8sResult<Vec<NodeMetrics>> {
        let response = self
            .get_json("/apis/metrics.k8s.io/v1beta1/nodes".to_string())
            .await?;
        Ok(parse_node_metrics(&response))
    }

    async fn pod_metrics(&self, namespace: &str) -> K8sResult<Vec<PodMetrics>> {
        let response = self
            .get_json(format!(
                "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods",
                namespace
            ))
            .await?;
        Ok(parse_pod_metrics(&response))
    }
}

/// NodeMetricsList JSON into wire metrics
pub fn parse_node_metrics(response: &serde_json::Value) -> Vec<NodeMetrics> {
    let items = response["items"].as_array().cloned().unwrap_or_default();

    items
        .into_iter()
        .filter_map(|item| {
            let name = item["metadata"]["name"].as_str()?.to_string();
            let usage = &item["usage"];
            Some(NodeMetrics {
                name,
                cpu_usage: usage["cpu"].as_str().unwrap_or("0").to_string(),
                memory_usage: usage["memory"].as_str().unwrap_or("0").to_string(),
                timestamp: item["timestamp"].as_str().unwrap_or("").to_string(),
            })
        })
        .collect()
}

/// PodMetricsList JSON into wire metrics
pub fn parse_pod_metrics(response: &serde_json::Value) -> Vec<PodMetrics> {
    let items = response["items"].as_array().cloned().unwrap_or_default();

    items
        .into_iter()
        .filter_map(|item| {
            let name = item["metadata"]["name"].as_str()?.to_string();
            let namespace = item["metadata"]["namespace"].as_str()?.to_string();
            let timestamp = item["timestamp"].as_str().unwrap_or("").to_string();

            let containers = item["containers"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| {
                    let usage = &c["usage"];
                    Some(ContainerMetrics {
                        name: c["name"].as_str()?.to_string(),
                        cpu_usage: usage["cpu"].as_str().unwrap_or("0").to_string(),
                        memory_usage: usage["memory"].as_str().unwrap_or("0").to_string(),
                    })
                })
                .collect();

            Some(PodMetrics {
                name,
                namespace,
                containers,
                timestamp,
            })
        })
        .collect()
}

/// Connects to real clusters through kube-rs
#[derive(Debug, Clone)]
pub struct KubeConnector {
    pub connect_timeout: Duration,
    pub watch_timeout_secs: u32,
}

impl Default for KubeConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            watch_timeout_secs: 290,
        }
    }
}

impl KubeConnector {
    /// Kubeconfig document for a bearer-token credential
    fn token_kubeconfig(config: &ClusterConfig, token: &str) -> K8sResult<Kubeconfig> {
        let mut cluster = serde_json::json!({ "server": config.endpoint });
        if config.insecure_skip_verify {
            cluster["insecure-skip-tls-verify"] = serde_json::Value::Bool(true);
        }
        if let Some(ca) = &config.certificate_authority {
            cluster["certificate-authority-data"] = serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(ca.as_bytes()),
            );
        }

        let document = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": config.name, "cluster": cluster }],
            "users": [{ "name": config.name, "user": { "token": token } }],
            "contexts": [{
                "name": config.name,
                "context": { "cluster": config.name, "user": config.name }
            }],
            "current-context": config.name,
        });

        let yaml = serde_yaml::to_string(&document)
            .map_err(|e| K8sError::Internal(format!("Failed to render kubeconfig: {}", e)))?;
        Kubeconfig::from_yaml(&yaml).map_err(|e| {
            K8sError::InvalidClusterConfig(format!("Failed to build kubeconfig: {}", e))
        })
    }

    async fn kube_config(&self, config: &ClusterConfig) -> K8sResult<Config> {
        let (kubeconfig, context) = match &config.credential {
            Credential::Token { token } => (Self::token_kubeconfig(config, token)?, None),
            Credential::Kubeconfig {
                kubeconfig,
                context,
            } => {
                let parsed = Kubeconfig::from_yaml(kubeconfig).map_err(|e| {
                    K8sError::InvalidClusterConfig(format!("Failed to parse kubeconfig: {}", e))
                })?;
                (parsed, context.clone())
            }
        };

        let mut kube_config = Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| K8sError::InvalidClusterConfig(format!("Failed to create config: {}", e)))?;

        if !config.endpoint.is_empty() {
            kube_config.cluster_url = config.endpoint.parse::<http::Uri>().map_err(|e| {
                K8sError::InvalidClusterConfig(format!("Invalid endpoint: {}", e))
            })?;
        }
        if config.insecure_skip_verify {
            kube_config.accept_invalid_certs = true;
        }
        kube_config.connect_timeout = Some(self.connect_timeout);

        Ok(kube_config)
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, config: &ClusterConfig) -> K8sResult<ConnectedCluster> {
        let kube_config = self.kube_config(config).await?;
        let endpoint = kube_config.cluster_url.to_string();

        let client = Client::try_from(kube_config).map_err(|e| K8sError::Connect {
            cluster: config.name.clone(),
            message: format!("Failed to create client: {}", e),
        })?;

        // Lightweight probe: /version needs no RBAC beyond discovery
        let version = client
            .apiserver_version()
            .await
            .map_err(|e| K8sError::Connect {
                cluster: config.name.clone(),
                message: e.to_string(),
            })?;

        let kube = Arc::new(KubeClient::new(client, self.watch_timeout_secs));
        Ok(ConnectedCluster {
            clients: ClusterClients {
                typed: kube.clone(),
                dynamic: kube.clone(),
                metrics: kube,
            },
            endpoint,
            server_version: Some(version.git_version),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_kubeconfig() {
        let config = ClusterConfig {
            name: "prod".to_string(),
            endpoint: "https://10.0.0.1:6443".to_string(),
            credential: Credential::Token {
                token: "abc".to_string(),
            },
            insecure_skip_verify: true,
            certificate_authority: None,
        };
        let kubeconfig = KubeConnector::token_kubeconfig(&config, "abc").unwrap();
        assert_eq!(kubeconfig.current_context.as_deref(), Some("prod"));
        assert_eq!(kubeconfig.clusters.len(), 1);
        let cluster = kubeconfig.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(cluster.insecure_skip_tls_verify, Some(true));
    }

    #[test]
    fn test_parse_metrics() {
        let nodes = serde_json::json!({
            "items": [
                {"metadata": {"name": "node-1"}, "usage": {"cpu": "250m", "memory": "1Gi"}, "timestamp": "t"},
                {"usage": {"cpu": "1"}}
            ]
        });
        let parsed = parse_node_metrics(&nodes);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].cpu_usage, "250m");

        let pods = serde_json::json!({
            "items": [{
                "metadata": {"name": "web-1", "namespace": "default"},
                "containers": [{"name": "app", "usage": {"cpu": "10m", "memory": "64Mi"}}]
            }]
        });
        let parsed = parse_pod_metrics(&pods);
        assert_eq!(parsed[0].containers[0].memory_usage, "64Mi");
    }
}
