//! WebSocket transport for watch streams
//!
//! `GET /api/watch` subscribes before upgrading, so an unknown cluster or kind
//! is reported as a normal HTTP error. After the upgrade every watch frame is
//! sent as one JSON text message.

use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;
use crate::kubernetes::{resolver, WatchSubscription};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    Extension,
};
use futures::{SinkExt, StreamExt};
use kubegate_common::WatchFrame;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    pub cluster: String,
    pub kind: String,
    pub namespace: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<WatchQuery>,
) -> Result<Response, ApiError> {
    let descriptor = resolver::resolve(&query.kind)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown resource kind '{}'", query.kind)))?;
    let namespace = query.namespace.as_deref().filter(|ns| !ns.is_empty());
    auth_user.require_namespace(descriptor.scope(namespace))?;

    let subscription = state
        .watches
        .subscribe(&query.cluster, &query.kind, namespace)
        .await?;

    info!(
        user = %auth_user.username,
        watch = %subscription.key(),
        "Watch stream opened"
    );

    Ok(ws.on_upgrade(move |socket| stream_frames(socket, subscription, auth_user)))
}

fn encode(frame: &WatchFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            warn!("Failed to encode watch frame: {}", e);
            None
        }
    }
}

/// Pump frames until the subscription ends or the client goes away.
/// Dropping the subscription detaches it from the watch channel.
async fn stream_frames(socket: WebSocket, mut subscription: WatchSubscription, auth_user: AuthUser) {
    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = subscription.next() => {
                let Some(frame) = frame else { break };
                let terminal = frame.is_terminal();
                if let Some(message) = encode(&frame) {
                    if sender.send(message).await.is_err() {
                        break;
                    }
                }
                if terminal {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(user = %auth_user.username, "Client closed watch stream");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(user = %auth_user.username, error = %e, "Watch socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(
        user = %auth_user.username,
        watch = %subscription.key(),
        dropped = subscription.dropped(),
        "Watch stream closed"
    );
}
