//! Watch channel lifecycle
//!
//! The upstream watch for one key moves through a small state machine. The
//! transition function is pure so the reconnect policy can be tested without
//! any I/O.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum WatchPhase {
    /// No subscribers, no upstream watch
    Idle,
    /// Initial list and watch being established
    Opening,
    /// Events flowing to subscribers
    Streaming,
    /// Upstream dropped; `attempt` counts consecutive failures
    Reconnecting { attempt: u32 },
    /// Terminal; subscribers have been sent an error frame
    Failed,
}

/// What happened to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSignal {
    SubscriberJoined,
    /// List and watch both succeeded
    Established,
    /// Upstream stream ended without an error
    UpstreamClosed,
    /// List, watch or stream returned a retryable error
    UpstreamFailed,
    /// The watched kind is no longer served
    SchemaGone,
    LastSubscriberLeft,
}

fn retry(attempt: u32, max_attempts: u32) -> WatchPhase {
    if attempt > max_attempts {
        WatchPhase::Failed
    } else {
        WatchPhase::Reconnecting { attempt }
    }
}

/// Transition table for one watch key
pub fn transition(phase: WatchPhase, signal: WatchSignal, max_attempts: u32) -> WatchPhase {
    use WatchPhase::*;
    use WatchSignal::*;

    match (phase, signal) {
        (Failed, _) => Failed,
        (_, LastSubscriberLeft) => Idle,
        (_, SchemaGone) => Failed,

        (Idle, SubscriberJoined) => Opening,
        (Idle, _) => Idle,

        (Opening | Reconnecting { .. }, Established) => Streaming,
        (Opening | Streaming, UpstreamClosed | UpstreamFailed) => retry(1, max_attempts),
        (Reconnecting { attempt }, UpstreamClosed | UpstreamFailed) => retry(attempt + 1, max_attempts),

        (current, SubscriberJoined) => current,
        (Streaming, Established) => Streaming,
    }
}
