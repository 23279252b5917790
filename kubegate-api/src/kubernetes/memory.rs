//! In-memory cluster backend
//!
//! Implements the client handle traits against a local object store with
//! monotonically increasing resource versions, conditional writes, a bounded
//! watch history and graceful deletion. Workload status is filled in as if a
//! controller had converged instantly. Used by the test suites and for running
//! the gateway without a real cluster.

use super::client::{
    ClusterClients, ClusterConnector, ConnectedCluster, DeleteOptions, DynamicApi, ListOptions,
    MetricsApi, ObjectPage, TypedApi, UpstreamEvent, UpstreamEventStream,
};
use super::error::{K8sError, K8sResult};
use super::resolver::{self, ResourceDescriptor, StatusRule};
use super::types::ClusterConfig;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{LimitRange, ResourceQuota};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kubegate_common::{NodeMetrics, PodMetrics};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const HISTORY_LIMIT: usize = 1000;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    revision: u64,
    kind: String,
    namespace: String,
    change: Change,
    object: DynamicObject,
}

impl StoredEvent {
    fn into_upstream(self) -> UpstreamEvent {
        match self.change {
            Change::Added => UpstreamEvent::Added(self.object),
            Change::Modified => UpstreamEvent::Modified(self.object),
            Change::Deleted => UpstreamEvent::Deleted(self.object),
        }
    }
}

struct MemoryState {
    revision: u64,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    history: VecDeque<StoredEvent>,
    /// Events at or below this revision are no longer replayable
    compacted_through: u64,
    removed_kinds: HashSet<String>,
    reachable: bool,
    writes: u64,
    watch_faults: VecDeque<K8sError>,
    graceful_delay: Duration,
    write_latency: Duration,
    node_metrics: Vec<NodeMetrics>,
    pod_metrics: Vec<PodMetrics>,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<StoredEvent>,
    disconnect: watch::Sender<u64>,
}

/// In-memory stand-in for one Kubernetes API server
#[derive(Clone)]
pub struct InMemoryCluster {
    inner: Arc<MemoryInner>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("InMemoryCluster")
            .field("revision", &state.revision)
            .field("objects", &state.objects.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (disconnect, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState {
                    revision: 0,
                    objects: BTreeMap::new(),
                    history: VecDeque::new(),
                    compacted_through: 0,
                    removed_kinds: HashSet::new(),
                    reachable: true,
                    writes: 0,
                    watch_faults: VecDeque::new(),
                    graceful_delay: Duration::from_millis(50),
                    write_latency: Duration::ZERO,
                    node_metrics: Vec::new(),
                    pod_metrics: Vec::new(),
                }),
                events,
                disconnect,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.inner.state)
    }

    /// Client handles backed by this cluster
    pub fn clients(&self) -> ClusterClients {
        let shared = Arc::new(self.clone());
        ClusterClients {
            typed: shared.clone(),
            dynamic: shared.clone(),
            metrics: shared,
        }
    }

    /// Create an object from a JSON manifest, as if applied by another client
    pub fn seed(&self, manifest: serde_json::Value) -> K8sResult<DynamicObject> {
        let object: DynamicObject = serde_json::from_value(manifest)
            .map_err(|e| K8sError::validation(format!("invalid manifest: {}", e)))?;
        let kind = object
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_default();
        let descriptor =
            resolver::resolve(&kind).ok_or_else(|| K8sError::KindNotFound(kind.clone()))?;
        let namespace = object.metadata.namespace.clone();
        self.create_object(descriptor, namespace.as_deref(), &object)
    }

    /// Current stored copy of an object
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.state()
            .objects
            .get(&ObjectKey {
                kind: kind.to_string(),
                namespace: namespace.unwrap_or("").to_string(),
                name: name.to_string(),
            })
            .cloned()
    }

    pub fn current_revision(&self) -> u64 {
        self.state().revision
    }

    /// Number of successful mutations served so far
    pub fn write_count(&self) -> u64 {
        self.state().writes
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
        if !reachable {
            self.disconnect_watches();
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.state().reachable
    }

    /// How long a graceful delete keeps the object in Terminating
    pub fn set_graceful_delay(&self, delay: Duration) {
        self.state().graceful_delay = delay;
    }

    /// Hold back the response to each create, replace and scale after the write is applied
    pub fn set_write_latency(&self, latency: Duration) {
        self.state().write_latency = latency;
    }

    async fn acknowledge_write(&self) {
        let latency = self.state().write_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// End every open watch stream, as a dropped connection would
    pub fn disconnect_watches(&self) {
        self.inner.disconnect.send_modify(|generation| *generation += 1);
    }

    /// Fail the next watch request with `error`; queued faults fire in order
    pub fn fail_next_watch(&self, error: K8sError) {
        self.state().watch_faults.push_back(error);
    }

    /// Forget replayable history; older resume points become Gone
    pub fn compact(&self) {
        let mut state = self.state();
        state.history.clear();
        state.compacted_through = state.revision;
    }

    /// Stop serving a kind entirely, as when its CRD is deleted
    pub fn remove_kind(&self, kind: &str) {
        {
            let mut state = self.state();
            state.removed_kinds.insert(kind.to_string());
            state.objects.retain(|key, _| key.kind != kind);
        }
        self.disconnect_watches();
    }

    pub fn set_node_metrics(&self, metrics: Vec<NodeMetrics>) {
        self.state().node_metrics = metrics;
    }

    pub fn set_pod_metrics(&self, metrics: Vec<PodMetrics>) {
        self.state().pod_metrics = metrics;
    }

    fn create_object(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject> {
        let mut state = self.state();
        state.check_serving(descriptor, false)?;

        let namespace = effective_namespace(descriptor, namespace, object)?;
        let name = object
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| K8sError::validation("metadata.name is required"))?;
        let key = ObjectKey {
            kind: descriptor.kind.to_string(),
            namespace: namespace.clone(),
            name: name.clone(),
        };
        if state.objects.contains_key(&key) {
            return Err(K8sError::Conflict(format!(
                "{} \"{}\" already exists",
                descriptor.kind, name
            )));
        }

        let mut stored = object.clone();
        state.revision += 1;
        stored.metadata.namespace = descriptor.namespaced.then(|| namespace.clone());
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.resource_version = Some(state.revision.to_string());
        stored.metadata.generation = Some(1);
        stored.metadata.deletion_timestamp = None;
        converge(descriptor, &mut stored);

        state.objects.insert(key, stored.clone());
        state.writes += 1;
        self.record(&mut state, Change::Added, descriptor.kind, &namespace, &stored);
        Ok(stored)
    }

    fn record(
        &self,
        state: &mut MemoryState,
        change: Change,
        kind: &str,
        namespace: &str,
        object: &DynamicObject,
    ) {
        let event = StoredEvent {
            revision: state.revision,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            change,
            object: object.clone(),
        };
        state.history.push_back(event.clone());
        while state.history.len() > HISTORY_LIMIT {
            if let Some(old) = state.history.pop_front() {
                state.compacted_through = old.revision;
            }
        }
        // Sent under the state lock so watch registration sees a consistent cut
        let _ = self.inner.events.send(event);
    }

    fn finish_deletion(&self, key: &ObjectKey, uid: Option<&str>) {
        let mut state = self.state();
        let matches = state
            .objects
            .get(key)
            .map_or(false, |o| o.metadata.uid.as_deref() == uid);
        if !matches {
            return;
        }
        if let Some(mut removed) = state.objects.remove(key) {
            state.revision += 1;
            removed.metadata.resource_version = Some(state.revision.to_string());
            let (kind, namespace) = (key.kind.clone(), key.namespace.clone());
            self.record(&mut state, Change::Deleted, &kind, &namespace, &removed);
        }
    }
}

impl MemoryState {
    fn check_serving(&self, descriptor: &ResourceDescriptor, collection: bool) -> K8sResult<()> {
        if !self.reachable {
            return Err(K8sError::Upstream("connection refused".to_string()));
        }
        if self.removed_kinds.contains(descriptor.kind) {
            return Err(if collection {
                K8sError::ResourceTypeGone(descriptor.kind.to_string())
            } else {
                K8sError::resource_not_found(descriptor.kind, "", None)
            });
        }
        Ok(())
    }

    fn typed<T: DeserializeOwned>(&self, kind: &str, namespace: &str) -> K8sResult<Vec<T>> {
        if !self.reachable {
            return Err(K8sError::Upstream("connection refused".to_string()));
        }
        self.objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .map(|(_, object)| {
                serde_json::to_value(object)
                    .and_then(serde_json::from_value)
                    .map_err(|e| K8sError::Internal(format!("stored {} is malformed: {}", kind, e)))
            })
            .collect()
    }
}

fn effective_namespace(
    descriptor: &ResourceDescriptor,
    namespace: Option<&str>,
    object: &DynamicObject,
) -> K8sResult<String> {
    if !descriptor.namespaced {
        return Ok(String::new());
    }
    descriptor
        .scope(namespace)
        .map(str::to_string)
        .or_else(|| object.metadata.namespace.clone().filter(|n| !n.is_empty()))
        .ok_or_else(|| K8sError::validation(format!("{} requires a namespace", descriptor.kind)))
}

/// Fill in status as a converged controller would
fn converge(descriptor: &ResourceDescriptor, object: &mut DynamicObject) {
    let generation = object.metadata.generation.unwrap_or(1);
    match descriptor.status {
        StatusRule::Replicated => {
            let replicas = object.data["spec"]["replicas"].as_i64().unwrap_or(1);
            object.data["status"] = serde_json::json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "readyReplicas": replicas,
                "availableReplicas": replicas,
                "updatedReplicas": replicas,
            });
        }
        StatusRule::DaemonSet => {
            object.data["status"] = serde_json::json!({
                "observedGeneration": generation,
                "desiredNumberScheduled": 1,
                "currentNumberScheduled": 1,
                "numberReady": 1,
                "numberAvailable": 1,
            });
        }
        StatusRule::Pod => {
            if object.data["status"]["phase"].is_null() {
                object.data["status"] = serde_json::json!({ "phase": "Running" });
            }
        }
        StatusRule::Phase => {
            if object.data["status"]["phase"].is_null() {
                let phase = match descriptor.kind {
                    "PersistentVolumeClaim" | "PersistentVolume" => "Bound",
                    _ => "Active",
                };
                object.data["status"] = serde_json::json!({ "phase": phase });
            }
        }
        _ => {}
    }
}

/// Equality-based label selectors: `k=v`, `k==v`, `k!=v`, `k`, `!k`
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

struct LiveFeed {
    events: broadcast::Receiver<StoredEvent>,
    disconnect: watch::Receiver<u64>,
    kind: String,
    namespace: Option<String>,
}

impl LiveFeed {
    fn matches(&self, event: &StoredEvent) -> bool {
        event.kind == self.kind
            && self
                .namespace
                .as_ref()
                .map_or(true, |ns| *ns == event.namespace)
    }
}

#[async_trait]
impl DynamicApi for InMemoryCluster {
    async fn list(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> K8sResult<ObjectPage> {
        let state = self.state();
        state.check_serving(descriptor, true)?;

        let scope = descriptor.scope(namespace);
        let offset = match options.continue_token.as_deref() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| K8sError::validation(format!("invalid continue token '{}'", token)))?,
            None => 0,
        };

        let matching: Vec<&DynamicObject> = state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == descriptor.kind)
            .filter(|(key, _)| scope.map_or(true, |ns| key.namespace == ns))
            .filter(|(_, object)| {
                options
                    .label_selector
                    .as_deref()
                    .map_or(true, |s| selector_matches(s, object.metadata.labels.as_ref()))
            })
            .map(|(_, object)| object)
            .collect();

        let limit = options.limit.map_or(usize::MAX, |l| l.max(1) as usize);
        let items: Vec<DynamicObject> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|o| (*o).clone())
            .collect();
        let next = offset.saturating_add(items.len());
        let continue_token = (next < matching.len()).then(|| next.to_string());

        Ok(ObjectPage {
            items,
            continue_token,
            resource_version: state.revision.to_string(),
        })
    }

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> K8sResult<Option<DynamicObject>> {
        let state = self.state();
        state.check_serving(descriptor, false)?;
        Ok(state
            .objects
            .get(&ObjectKey {
                kind: descriptor.kind.to_string(),
                namespace: descriptor.scope(namespace).unwrap_or("").to_string(),
                name: name.to_string(),
            })
            .cloned())
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject> {
        let created = self.create_object(descriptor, namespace, object)?;
        self.acknowledge_write().await;
        Ok(created)
    }

    async fn replace(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        object: &DynamicObject,
    ) -> K8sResult<DynamicObject> {
        let stored = {
            let mut state = self.state();
            state.check_serving(descriptor, false)?;

            let namespace = effective_namespace(descriptor, namespace, object)?;
            let key = ObjectKey {
                kind: descriptor.kind.to_string(),
                namespace: namespace.clone(),
                name: name.to_string(),
            };
            let existing = state.objects.get(&key).cloned().ok_or_else(|| {
                K8sError::resource_not_found(descriptor.kind, name, descriptor.scope(Some(&namespace)))
            })?;

            if let Some(expected) = object.metadata.resource_version.as_deref().filter(|rv| !rv.is_empty()) {
                if existing.metadata.resource_version.as_deref() != Some(expected) {
                    return Err(K8sError::Conflict(format!(
                        "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
                        descriptor.plural, name
                    )));
                }
            }

            let mut stored = object.clone();
            state.revision += 1;
            stored.metadata.name = Some(name.to_string());
            stored.metadata.namespace = existing.metadata.namespace.clone();
            stored.metadata.uid = existing.metadata.uid.clone();
            stored.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
            stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
            stored.metadata.generation = Some(existing.metadata.generation.unwrap_or(1) + 1);
            stored.metadata.resource_version = Some(state.revision.to_string());
            converge(descriptor, &mut stored);

            state.objects.insert(key, stored.clone());
            state.writes += 1;
            self.record(&mut state, Change::Modified, descriptor.kind, &namespace, &stored);
            stored
        };
        self.acknowledge_write().await;
        Ok(stored)
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        options: &DeleteOptions,
    ) -> K8sResult<()> {
        let key = ObjectKey {
            kind: descriptor.kind.to_string(),
            namespace: descriptor.scope(namespace).unwrap_or("").to_string(),
            name: name.to_string(),
        };

        let (uid, delay) = {
            let mut state = self.state();
            state.check_serving(descriptor, false)?;

            let existing = state
                .objects
                .get(&key)
                .cloned()
                .ok_or_else(|| K8sError::resource_not_found(descriptor.kind, name, descriptor.scope(namespace)))?;

            if let Some(expected) = &options.precondition_uid {
                if existing.metadata.uid.as_ref() != Some(expected) {
                    return Err(K8sError::Precondition(format!(
                        "UID in precondition: {}, UID in object meta: {}",
                        expected,
                        existing.metadata.uid.as_deref().unwrap_or("")
                    )));
                }
            }

            let uid = existing.metadata.uid.clone();
            state.writes += 1;

            if options.grace_period_seconds == Some(0) {
                drop(state);
                self.finish_deletion(&key, uid.as_deref());
                return Ok(());
            }

            if existing.metadata.deletion_timestamp.is_none() {
                let mut terminating = existing;
                state.revision += 1;
                terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                terminating.metadata.resource_version = Some(state.revision.to_string());
                state.objects.insert(key.clone(), terminating.clone());
                let ns = key.namespace.clone();
                self.record(&mut state, Change::Modified, descriptor.kind, &ns, &terminating);
            }
            (uid, state.graceful_delay)
        };

        let cluster = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cluster.finish_deletion(&key, uid.as_deref());
        });
        Ok(())
    }

    async fn scale(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
        replicas: i32,
        resource_version: Option<&str>,
    ) -> K8sResult<()> {
        {
            let mut state = self.state();
            state.check_serving(descriptor, false)?;

            let key = ObjectKey {
                kind: descriptor.kind.to_string(),
                namespace: descriptor.scope(namespace).unwrap_or("").to_string(),
                name: name.to_string(),
            };
            let mut object = match state.objects.get(&key) {
                Some(o) if descriptor.scalable => o.clone(),
                _ => {
                    return Err(K8sError::resource_not_found(
                        descriptor.kind,
                        &format!("{}/scale", name),
                        descriptor.scope(namespace),
                    ))
                }
            };

            if let Some(expected) = resource_version {
                if object.metadata.resource_version.as_deref() != Some(expected) {
                    return Err(K8sError::Conflict(format!(
                        "Operation cannot be fulfilled on {}.scale \"{}\": the object has been modified",
                        descriptor.plural, name
                    )));
                }
            }

            state.revision += 1;
            object.data["spec"]["replicas"] = serde_json::json!(replicas);
            object.metadata.generation = Some(object.metadata.generation.unwrap_or(1) + 1);
            object.metadata.resource_version = Some(state.revision.to_string());
            converge(descriptor, &mut object);

            state.objects.insert(key.clone(), object.clone());
            state.writes += 1;
            self.record(&mut state, Change::Modified, descriptor.kind, &key.namespace, &object);
        }
        self.acknowledge_write().await;
        Ok(())
    }

    async fn watch(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> K8sResult<UpstreamEventStream> {
        let mut state = self.state();
        state.check_serving(descriptor, true)?;

        if let Some(fault) = state.watch_faults.pop_front() {
            return Err(fault);
        }

        let from: u64 = resource_version
            .parse()
            .map_err(|_| K8sError::Gone(format!("unparseable resource version '{}'", resource_version)))?;
        if from < state.compacted_through {
            return Err(K8sError::Gone(format!(
                "too old resource version: {} ({})",
                from, state.compacted_through
            )));
        }

        let mut disconnect = self.inner.disconnect.subscribe();
        disconnect.borrow_and_update();
        let feed = LiveFeed {
            events: self.inner.events.subscribe(),
            disconnect,
            kind: descriptor.kind.to_string(),
            namespace: descriptor.scope(namespace).map(str::to_string),
        };

        let backlog: Vec<K8sResult<UpstreamEvent>> = state
            .history
            .iter()
            .filter(|e| e.revision > from && feed.matches(e))
            .cloned()
            .map(|e| Ok(e.into_upstream()))
            .collect();
        drop(state);

        let live = stream::unfold(feed, |mut feed| async move {
            loop {
                tokio::select! {
                    _ = feed.disconnect.changed() => return None,
                    received = feed.events.recv() => match received {
                        Ok(event) if feed.matches(&event) => {
                            return Some((Ok(event.into_upstream()), feed));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            return Some((Err(K8sError::Gone("watch fell behind".to_string())), feed));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream::iter(backlog).chain(live).boxed())
    }
}

#[async_trait]
impl TypedApi for InMemoryCluster {
    async fn resource_quotas(&self, namespace: &str) -> K8sResult<Vec<ResourceQuota>> {
        self.state().typed("ResourceQuota", namespace)
    }

    async fn limit_ranges(&self, namespace: &str) -> K8sResult<Vec<LimitRange>> {
        self.state().typed("LimitRange", namespace)
    }
}

#[async_trait]
impl MetricsApi for InMemoryCluster {
    async fn node_metrics(&self) -> K8sResult<Vec<NodeMetrics>> {
        Ok(self.state().node_metrics.clone())
    }

    async fn pod_metrics(&self, namespace: &str) -> K8sResult<Vec<PodMetrics>> {
        Ok(self
            .state()
            .pod_metrics
            .iter()
            .filter(|m| m.namespace == namespace)
            .cloned()
            .collect())
    }
}

/// Connector resolving cluster endpoints to in-memory clusters
#[derive(Default)]
pub struct MemoryConnector {
    clusters: Mutex<HashMap<String, InMemoryCluster>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `cluster` at `endpoint`
    pub fn add(&self, endpoint: &str, cluster: InMemoryCluster) {
        lock(&self.clusters).insert(endpoint.to_string(), cluster);
    }
}

#[async_trait]
impl ClusterConnector for MemoryConnector {
    async fn connect(&self, config: &ClusterConfig) -> K8sResult<ConnectedCluster> {
        let cluster = lock(&self.clusters).get(&config.endpoint).cloned();
        match cluster {
            Some(cluster) if cluster.is_reachable() => Ok(ConnectedCluster {
                clients: cluster.clients(),
                endpoint: config.endpoint.clone(),
                server_version: Some("v1.32.0".to_string()),
            }),
            Some(_) => Err(K8sError::Connect {
                cluster: config.name.clone(),
                message: format!("connection refused: {}", config.endpoint),
            }),
            None => Err(K8sError::Connect {
                cluster: config.name.clone(),
                message: format!("no route to host: {}", config.endpoint),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(name: &str, replicas: i64) -> serde_json::Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "default", "labels": {"app": name}},
            "spec": {"replicas": replicas}
        })
    }

    fn deploy() -> &'static ResourceDescriptor {
        resolver::resolve("Deployment").unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_metadata_and_converges() {
        let cluster = InMemoryCluster::new();
        let created = cluster.seed(deployment("web", 2)).unwrap();
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.data["status"]["readyReplicas"], 2);
        assert!(cluster.seed(deployment("web", 2)).is_err());
    }

    #[tokio::test]
    async fn test_replace_requires_matching_version() {
        let cluster = InMemoryCluster::new();
        let created = cluster.seed(deployment("web", 1)).unwrap();

        let mut stale = created.clone();
        stale.metadata.resource_version = Some("999".to_string());
        let err = cluster
            .replace(deploy(), Some("default"), "web", &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, K8sError::Conflict(_)));

        let updated = cluster
            .replace(deploy(), Some("default"), "web", &created)
            .await
            .unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
        assert_eq!(updated.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn test_list_paginates_and_filters() {
        let cluster = InMemoryCluster::new();
        for name in ["a", "b", "c"] {
            cluster.seed(deployment(name, 1)).unwrap();
        }

        let options = ListOptions {
            limit: Some(2),
            ..Default::default()
        };
        let first = cluster.list(deploy(), Some("default"), &options).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.continue_token.clone().unwrap();

        let second = cluster
            .list(
                deploy(),
                Some("default"),
                &ListOptions {
                    continue_token: Some(token),
                    ..options
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.continue_token.is_none());

        let filtered = cluster
            .list(
                deploy(),
                None,
                &ListOptions {
                    label_selector: Some("app=b".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.items.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_replays_from_version() {
        let cluster = InMemoryCluster::new();
        cluster.seed(deployment("a", 1)).unwrap();
        let mut events = cluster.watch(deploy(), Some("default"), "1").await.unwrap();

        cluster.seed(deployment("b", 1)).unwrap();
        match events.next().await {
            Some(Ok(UpstreamEvent::Added(obj))) => {
                assert_eq!(obj.metadata.name.as_deref(), Some("b"));
            }
            other => panic!("unexpected {:?}", other.map(|r| r.is_ok())),
        }

        cluster.disconnect_watches();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_after_compaction_is_gone() {
        let cluster = InMemoryCluster::new();
        cluster.seed(deployment("a", 1)).unwrap();
        cluster.seed(deployment("b", 1)).unwrap();
        cluster.compact();
        assert!(matches!(
            cluster.watch(deploy(), None, "1").await,
            Err(K8sError::Gone(_))
        ));
        assert!(cluster.watch(deploy(), None, "2").await.is_ok());
    }

    #[tokio::test]
    async fn test_graceful_and_forced_delete() {
        let cluster = InMemoryCluster::new();
        cluster.set_graceful_delay(Duration::from_millis(20));
        cluster.seed(deployment("a", 1)).unwrap();
        cluster.seed(deployment("b", 1)).unwrap();

        cluster
            .delete(deploy(), Some("default"), "a", &DeleteOptions::default())
            .await
            .unwrap();
        let terminating = cluster.object("Deployment", Some("default"), "a").unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        cluster
            .delete(
                deploy(),
                Some("default"),
                "b",
                &DeleteOptions {
                    grace_period_seconds: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cluster.object("Deployment", Some("default"), "b").is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cluster.object("Deployment", Some("default"), "a").is_none());
    }

    #[tokio::test]
    async fn test_delete_uid_precondition() {
        let cluster = InMemoryCluster::new();
        cluster.seed(deployment("a", 1)).unwrap();
        let err = cluster
            .delete(
                deploy(),
                Some("default"),
                "a",
                &DeleteOptions {
                    grace_period_seconds: Some(0),
                    precondition_uid: Some("other".to_string()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, K8sError::Precondition(_)));
    }

    #[test]
    fn test_selector_matching() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        labels.insert("tier".to_string(), "front".to_string());
        assert!(selector_matches("app=web", Some(&labels)));
        assert!(selector_matches("app==web,tier", Some(&labels)));
        assert!(selector_matches("app!=db,!missing", Some(&labels)));
        assert!(!selector_matches("app=db", Some(&labels)));
        assert!(!selector_matches("app", None));
        assert!(selector_matches("", None));
    }
}
