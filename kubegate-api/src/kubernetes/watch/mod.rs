//! Watch streamer
//!
//! One upstream watch per (cluster, namespace, kind) key, fanned out to any
//! number of subscribers. Each subscriber owns a bounded queue, so a slow
//! consumer only ever loses its own oldest frames.
//!
//! Lock order is hub map first, then channel state. Relay never holds either
//! lock while pushing into queues.

mod queue;
mod state;
mod worker;

pub use queue::SubscriberQueue;
pub use state::{transition, WatchPhase, WatchSignal};

use super::error::{K8sError, K8sResult};
use super::registry::{ClusterConnection, ClusterRegistry};
use super::resolver::ResourceDescriptor;
use super::resources::{list_all, resolve_kind};
use super::summary::summarize;
use kubegate_common::WatchFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Upstream watch identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub cluster: String,
    /// `None` watches all namespaces
    pub namespace: Option<String>,
    pub kind: &'static str,
}

impl std::fmt::Display for WatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.cluster,
            self.namespace.as_deref().unwrap_or("*"),
            self.kind
        )
    }
}

/// Tuning for watch channels
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub subscriber_buffer: usize,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub list_page_size: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            list_page_size: 500,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ChannelState {
    phase: WatchPhase,
    /// Replaced wholesale on attach/detach so relay can clone it cheaply
    subscribers: Arc<Vec<(u64, Arc<SubscriberQueue>)>>,
}

/// Shared upstream watch for one key
pub(crate) struct WatchChannel {
    key: WatchKey,
    descriptor: &'static ResourceDescriptor,
    connection: Arc<ClusterConnection>,
    state: Mutex<ChannelState>,
    stop: watch::Sender<bool>,
}

impl WatchChannel {
    fn new(key: WatchKey, descriptor: &'static ResourceDescriptor, connection: Arc<ClusterConnection>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            key,
            descriptor,
            connection,
            state: Mutex::new(ChannelState {
                phase: WatchPhase::Idle,
                subscribers: Arc::new(Vec::new()),
            }),
            stop,
        }
    }

    fn phase(&self) -> WatchPhase {
        lock(&self.state).phase
    }

    fn subscribers(&self) -> Arc<Vec<(u64, Arc<SubscriberQueue>)>> {
        lock(&self.state).subscribers.clone()
    }

    fn namespace(&self) -> Option<&str> {
        self.key.namespace.as_deref()
    }

    /// Relay one frame to every current subscriber
    fn fan_out(&self, frame: &WatchFrame, revision: Option<u64>) {
        for (_, queue) in self.subscribers().iter() {
            queue.push_event(frame.clone(), revision);
        }
    }
}

pub(crate) struct StreamerInner {
    registry: Arc<ClusterRegistry>,
    settings: WatchSettings,
    channels: Mutex<HashMap<WatchKey, Arc<WatchChannel>>>,
    next_id: AtomicU64,
}

impl StreamerInner {
    /// Apply a signal under the channel lock and return the new phase
    fn signal(&self, channel: &WatchChannel, signal: WatchSignal) -> WatchPhase {
        let mut state = lock(&channel.state);
        let next = transition(state.phase, signal, self.settings.max_reconnect_attempts);
        if next != state.phase {
            tracing::debug!(
                watch = %channel.key,
                from = ?state.phase,
                to = ?next,
                signal = ?signal,
                "Watch phase change"
            );
        }
        state.phase = next;
        next
    }

    /// Enter Streaming and return the subscribers that need the worker's baseline
    fn establish(&self, channel: &WatchChannel) -> Option<Arc<Vec<(u64, Arc<SubscriberQueue>)>>> {
        let mut state = lock(&channel.state);
        let next = transition(state.phase, WatchSignal::Established, self.settings.max_reconnect_attempts);
        if next != WatchPhase::Streaming {
            return None;
        }
        state.phase = next;
        Some(state.subscribers.clone())
    }

    /// Move a channel to Failed, detach everyone and send the terminal frame
    fn fail(&self, channel: &Arc<WatchChannel>, message: &str) {
        let subscribers = {
            let mut channels = lock(&self.channels);
            let mut state = lock(&channel.state);
            state.phase = transition(state.phase, WatchSignal::SchemaGone, self.settings.max_reconnect_attempts);
            if channels
                .get(&channel.key)
                .map_or(false, |current| Arc::ptr_eq(current, channel))
            {
                channels.remove(&channel.key);
            }
            std::mem::take(&mut state.subscribers)
        };

        tracing::warn!(
            watch = %channel.key,
            subscribers = subscribers.len(),
            error = %message,
            "Watch failed"
        );
        for (_, queue) in subscribers.iter() {
            queue.close_with(message);
        }
    }

    fn detach(&self, channel: &Arc<WatchChannel>, id: u64) {
        let mut channels = lock(&self.channels);
        let mut state = lock(&channel.state);

        let remaining: Vec<_> = state
            .subscribers
            .iter()
            .filter(|(sid, _)| *sid != id)
            .cloned()
            .collect();
        if remaining.len() == state.subscribers.len() {
            return;
        }
        state.subscribers = Arc::new(remaining);

        if state.subscribers.is_empty() {
            state.phase = transition(state.phase, WatchSignal::LastSubscriberLeft, self.settings.max_reconnect_attempts);
            channel.stop.send_replace(true);
            if channels
                .get(&channel.key)
                .map_or(false, |current| Arc::ptr_eq(current, channel))
            {
                channels.remove(&channel.key);
            }
            tracing::debug!(watch = %channel.key, "Last subscriber left; upstream watch torn down");
        }
    }
}

/// Multiplexes upstream watches to subscribers
#[derive(Clone)]
pub struct WatchStreamer {
    inner: Arc<StreamerInner>,
}

impl WatchStreamer {
    pub fn new(registry: Arc<ClusterRegistry>, settings: WatchSettings) -> Self {
        Self {
            inner: Arc::new(StreamerInner {
                registry,
                settings,
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a subscriber. The first frame it receives is always a snapshot.
    pub async fn subscribe(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> K8sResult<WatchSubscription> {
        let descriptor = resolve_kind(kind)?;
        let connection = self.inner.registry.get(cluster).await?;
        let key = WatchKey {
            cluster: cluster.to_string(),
            namespace: descriptor.scope(namespace).map(str::to_string),
            kind: descriptor.kind,
        };

        let queue = Arc::new(SubscriberQueue::new(self.inner.settings.subscriber_buffer));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let (channel, start_worker, needs_own_snapshot) = {
            let mut channels = lock(&self.inner.channels);
            let reusable = channels.get(&key).filter(|c| {
                Arc::ptr_eq(&c.connection, &connection) && c.phase() != WatchPhase::Failed
            });
            let channel = match reusable {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = Arc::new(WatchChannel::new(key.clone(), descriptor, connection.clone()));
                    channels.insert(key.clone(), fresh.clone());
                    fresh
                }
            };

            let mut state = lock(&channel.state);
            let before = state.phase;
            state.phase = transition(before, WatchSignal::SubscriberJoined, self.inner.settings.max_reconnect_attempts);
            let mut subscribers = state.subscribers.as_ref().clone();
            subscribers.push((id, queue.clone()));
            state.subscribers = Arc::new(subscribers);
            let needs_own_snapshot = state.phase == WatchPhase::Streaming;
            drop(state);

            (channel, before == WatchPhase::Idle, needs_own_snapshot)
        };

        let subscription = WatchSubscription {
            id,
            queue,
            channel: channel.clone(),
            inner: self.inner.clone(),
        };

        if start_worker {
            tracing::info!(watch = %key, "Opening upstream watch");
            tokio::spawn(worker::run(self.inner.clone(), channel.clone()));
        } else {
            tracing::debug!(watch = %key, subscribers = channel.subscribers().len(), "Subscriber joined");
        }

        if needs_own_snapshot {
            // Late joiner: attached first, so anything newer than this list is already queued
            let (objects, resource_version) = list_all(
                channel.connection.clients(),
                descriptor,
                channel.namespace(),
                self.inner.settings.list_page_size,
            )
            .await?;
            let items = objects.iter().map(|o| summarize(descriptor, o)).collect();
            subscription.queue.install_baseline(items, &resource_version);
        }

        Ok(subscription)
    }

    /// Number of live upstream channels
    pub fn active_channels(&self) -> usize {
        lock(&self.inner.channels).len()
    }

    pub fn phase(&self, key: &WatchKey) -> Option<WatchPhase> {
        lock(&self.inner.channels).get(key).map(|c| c.phase())
    }

    pub fn subscriber_count(&self, key: &WatchKey) -> usize {
        lock(&self.inner.channels)
            .get(key)
            .map_or(0, |c| c.subscribers().len())
    }
}

/// One consumer's handle; dropping it detaches the subscriber
pub struct WatchSubscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    channel: Arc<WatchChannel>,
    inner: Arc<StreamerInner>,
}

impl WatchSubscription {
    pub fn key(&self) -> &WatchKey {
        &self.channel.key
    }

    /// Next frame; `None` after the terminal frame
    pub async fn next(&mut self) -> Option<WatchFrame> {
        self.queue.next().await
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("id", &self.id)
            .field("key", &self.channel.key)
            .finish()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.inner.detach(&self.channel, self.id);
    }
}

fn terminal_message(err: &K8sError) -> String {
    match err {
        K8sError::ResourceTypeGone(kind) => {
            format!("resource type {} is no longer served by the cluster", kind)
        }
        other => other.to_string(),
    }
}
