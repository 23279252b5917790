//! Upstream watch worker
//!
//! One task per channel: list for a baseline, watch from the list's resource
//! version, relay events, and drive reconnects through the phase transition
//! table until the last subscriber leaves or the channel fails.

use super::{terminal_message, StreamerInner, WatchChannel, WatchPhase, WatchSignal};
use crate::kubernetes::client::UpstreamEvent;
use crate::kubernetes::error::K8sResult;
use crate::kubernetes::resources::list_all;
use crate::kubernetes::summary::summarize;
use futures::StreamExt;
use kubegate_common::{ResourceInstance, WatchFrame};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Resolves once the flag is raised
async fn raised(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without raising; never fires
            std::future::pending::<()>().await;
        }
    }
}

/// Exponential backoff with jitter, capped at `max`
pub(crate) fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = initial.saturating_mul(1u32 << exp).min(max);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(jitter).min(max)
}

pub(super) async fn run(inner: Arc<StreamerInner>, channel: Arc<WatchChannel>) {
    let mut stop = channel.stop.subscribe();
    let mut closed = channel.connection.closed();
    let max_attempts = inner.settings.max_reconnect_attempts;

    loop {
        if *stop.borrow() {
            break;
        }
        if *closed.borrow() {
            inner.fail(&channel, "cluster connection closed");
            return;
        }

        let outcome = tokio::select! {
            _ = raised(&mut stop) => break,
            _ = raised(&mut closed) => {
                inner.fail(&channel, "cluster connection closed");
                return;
            }
            outcome = stream_once(&inner, &channel) => outcome,
        };

        let signal = match outcome {
            Ok(()) => {
                tracing::debug!(watch = %channel.key, "Upstream watch ended");
                WatchSignal::UpstreamClosed
            }
            Err(e) if e.is_terminal_for_watch() => {
                inner.fail(&channel, &terminal_message(&e));
                return;
            }
            Err(e) => {
                tracing::warn!(watch = %channel.key, error = %e, "Upstream watch error");
                WatchSignal::UpstreamFailed
            }
        };

        match inner.signal(&channel, signal) {
            WatchPhase::Failed => {
                inner.fail(
                    &channel,
                    &format!("upstream watch lost after {} reconnect attempts", max_attempts),
                );
                return;
            }
            WatchPhase::Reconnecting { attempt } => {
                let delay = backoff_delay(attempt, inner.settings.initial_backoff, inner.settings.max_backoff);
                tracing::warn!(
                    watch = %channel.key,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting upstream watch"
                );
                tokio::select! {
                    _ = raised(&mut stop) => break,
                    _ = raised(&mut closed) => {
                        inner.fail(&channel, "cluster connection closed");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            WatchPhase::Idle => break,
            _ => {}
        }
    }

    tracing::debug!(watch = %channel.key, "Watch worker stopped");
}

/// One list + watch cycle; returns when the upstream stream ends
async fn stream_once(inner: &StreamerInner, channel: &WatchChannel) -> K8sResult<()> {
    let clients = channel.connection.clients();
    let descriptor = channel.descriptor;
    let namespace = channel.namespace();

    let (objects, resource_version) =
        list_all(clients, descriptor, namespace, inner.settings.list_page_size).await?;
    let mut events = clients
        .dynamic
        .watch(descriptor, namespace, &resource_version)
        .await?;

    let Some(subscribers) = inner.establish(channel) else {
        return Ok(());
    };
    let items: Vec<_> = objects.iter().map(|o| summarize(descriptor, o)).collect();
    tracing::info!(
        watch = %channel.key,
        items = items.len(),
        resource_version = %resource_version,
        subscribers = subscribers.len(),
        "Upstream watch established"
    );
    for (_, queue) in subscribers.iter() {
        queue.install_baseline(items.clone(), &resource_version);
    }

    while let Some(event) = events.next().await {
        let (object, wrap): (_, fn(ResourceInstance) -> WatchFrame) = match event? {
            UpstreamEvent::Added(o) => (o, |object| WatchFrame::Added { object }),
            UpstreamEvent::Modified(o) => (o, |object| WatchFrame::Modified { object }),
            UpstreamEvent::Deleted(o) => (o, |object| WatchFrame::Deleted { object }),
            UpstreamEvent::Bookmark(_) => continue,
        };
        let instance = summarize(descriptor, &object);
        let revision = instance.revision();
        channel.fan_out(&wrap(instance), revision);
    }

    Ok(())
}
