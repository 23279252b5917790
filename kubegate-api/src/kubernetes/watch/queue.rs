//! Per-subscriber delivery queue
//!
//! Bounded, non-blocking for the producer. When full, the oldest event frame is
//! discarded and counted; the consumer sees a DROPPED marker before the next
//! surviving frame. Event frames are held back until a baseline snapshot has
//! been installed, and frames already covered by that snapshot are filtered
//! out so the consumer never sees a gap or a duplicate.

use kubegate_common::{ResourceInstance, WatchFrame};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug)]
struct QueuedFrame {
    revision: Option<u64>,
    frame: WatchFrame,
}

#[derive(Debug, Default)]
struct QueueState {
    snapshot: Option<WatchFrame>,
    frames: VecDeque<QueuedFrame>,
    dropped: u64,
    /// Highest revision among discarded frames
    dropped_through: u64,
    baselined: bool,
    /// Revision of the most recent snapshot
    baseline_revision: u64,
    /// Highest revision already represented in this queue
    high_water: u64,
    terminal: Option<WatchFrame>,
    closed: bool,
}

pub struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl std::fmt::Debug for SubscriberQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SubscriberQueue")
            .field("queued", &state.frames.len())
            .field("dropped", &state.dropped)
            .field("closed", &state.closed)
            .finish()
    }
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a live event; never blocks
    pub fn push_event(&self, frame: WatchFrame, revision: Option<u64>) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if let Some(rev) = revision {
                if state.baselined && rev <= state.high_water {
                    return;
                }
                if state.baselined {
                    state.high_water = rev;
                }
            }
            state.frames.push_back(QueuedFrame { revision, frame });
            while state.frames.len() > self.capacity {
                if let Some(old) = state.frames.pop_front() {
                    state.dropped += 1;
                    state.dropped_through = state.dropped_through.max(old.revision.unwrap_or(u64::MAX));
                }
            }
        }
        self.notify.notify_one();
    }

    /// Install a point-in-time snapshot. Ignored when an equal or newer one is
    /// already in place.
    pub fn install_baseline(&self, items: Vec<ResourceInstance>, resource_version: &str) {
        let revision = resource_version.parse::<u64>().ok();
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if state.baselined {
                match revision {
                    Some(rev) if rev > state.baseline_revision => {}
                    _ => return,
                }
            }

            let cutoff = revision.unwrap_or(0);
            state.frames.retain(|f| f.revision.map_or(true, |r| r > cutoff));
            if state.dropped_through <= cutoff {
                state.dropped = 0;
                state.dropped_through = 0;
            }
            let newest_pending = state.frames.iter().filter_map(|f| f.revision).max();
            state.high_water = cutoff.max(newest_pending.unwrap_or(0));
            state.baselined = true;
            state.baseline_revision = cutoff;
            state.snapshot = Some(WatchFrame::Snapshot {
                resource_version: resource_version.to_string(),
                items,
            });
        }
        self.notify.notify_one();
    }

    /// Close with a terminal error frame delivered after what is already queued
    pub fn close_with(&self, message: impl Into<String>) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if !state.baselined {
                state.frames.clear();
            }
            state.closed = true;
            state.terminal = Some(WatchFrame::Error {
                message: message.into(),
            });
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_next(&self) -> Option<Option<WatchFrame>> {
        let mut state = self.lock();
        if let Some(snapshot) = state.snapshot.take() {
            return Some(Some(snapshot));
        }
        if state.baselined {
            if state.dropped > 0 {
                let count = std::mem::take(&mut state.dropped);
                state.dropped_through = 0;
                return Some(Some(WatchFrame::Dropped { count }));
            }
            if let Some(queued) = state.frames.pop_front() {
                return Some(Some(queued.frame));
            }
        }
        if let Some(terminal) = state.terminal.take() {
            return Some(Some(terminal));
        }
        if state.closed {
            return Some(None);
        }
        None
    }

    /// Next frame in delivery order; `None` once closed and drained
    pub async fn next(&self) -> Option<WatchFrame> {
        loop {
            if let Some(item) = self.try_next() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}
