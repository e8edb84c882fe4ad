//! Broadcast channel for telemetry snapshots.
//!
//! [`Broadcaster`] fans every published [`Snapshot`] out to every open
//! [`Subscription`]. Each subscription owns its own FIFO queue, so sinks
//! consume at independent rates and never compete for items.
//!
//! ```text
//!                          ┌─► [queue] ─► Subscription (persist)
//! Gatherer ─► Broadcaster ─┼─► [queue] ─► Subscription (republish)
//!                          └─► [queue] ─► Subscription (watchdog)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` appends to each queue and returns.
//! - **Start at now**: a subscription only sees snapshots published after it
//!   was created.
//! - **Exactly once, in order**: each subscription receives every later
//!   snapshot once, in publish order.
//! - **Unbounded by default**: a stalled subscriber's backlog grows. With
//!   `max_backlog` set, the oldest queued snapshot is dropped for that
//!   subscriber only.
//! - **Close on drop**: when the last `Broadcaster` handle is dropped,
//!   subscriptions drain their backlog and then yield `None`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;

use crate::types::Snapshot;

/// Publishing side of the snapshot channel.
///
/// Cheap to clone; clones share one subscriber registry.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

struct Shared {
    subscribers: Mutex<Vec<Weak<Queue>>>,
    max_backlog: Option<usize>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        for queue in lock(&self.subscribers).iter().filter_map(Weak::upgrade) {
            queue.close();
        }
    }
}

struct Queue {
    items: Mutex<VecDeque<Snapshot>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Queue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, snapshot: Snapshot, max_backlog: Option<usize>) {
        {
            let mut items = lock(&self.items);
            if let Some(cap) = max_backlog {
                while items.len() >= cap {
                    items.pop_front();
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        backlog = cap,
                        dropped_total = total,
                        "Subscriber backlog full, dropped oldest snapshot"
                    );
                }
            }
            items.push_back(snapshot);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Snapshot> {
        lock(&self.items).pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Creates a channel with unbounded per-subscriber backlogs.
    pub fn new() -> Self {
        Self::with_max_backlog(None)
    }

    /// Creates a channel whose subscribers keep at most `max_backlog`
    /// unread snapshots, dropping the oldest beyond that.
    pub fn with_max_backlog(max_backlog: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Vec::new()),
                max_backlog: max_backlog.map(|n| n.max(1)),
            }),
        }
    }

    /// Creates a new subscription positioned at "now".
    pub fn subscribe(&self) -> Subscription {
        let queue = Arc::new(Queue::new());
        lock(&self.shared.subscribers).push(Arc::downgrade(&queue));
        Subscription { queue }
    }

    /// Delivers a snapshot to every open subscription.
    ///
    /// Returns the number of subscriptions it was queued for. Never waits on
    /// consumers.
    pub fn publish(&self, snapshot: Snapshot) -> usize {
        let mut subscribers = lock(&self.shared.subscribers);
        subscribers.retain(|weak| weak.strong_count() > 0);

        let mut delivered = 0;
        for queue in subscribers.iter().filter_map(Weak::upgrade) {
            queue.push(snapshot.clone(), self.shared.max_backlog);
            delivered += 1;
        }
        delivered
    }

    /// Number of subscriptions that are still open.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// One independent read cursor into a [`Broadcaster`].
///
/// Dropping it unregisters the subscriber.
pub struct Subscription {
    queue: Arc<Queue>,
}

/// The bounded wait in [`Subscription::recv_timeout`] expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

impl Subscription {
    /// Waits for the next snapshot.
    ///
    /// Returns `None` once every `Broadcaster` handle is gone and the backlog
    /// is empty. Cancel-safe: dropping the future never loses a snapshot.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        loop {
            if let Some(snapshot) = self.queue.pop() {
                return Some(snapshot);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return self.queue.pop();
            }
            self.queue.notify.notified().await;
        }
    }

    /// Waits for the next snapshot for at most `timeout`.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<Snapshot>, Elapsed> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| Elapsed)
    }

    /// Returns a queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.queue.pop()
    }

    /// Snapshots queued but not yet received.
    pub fn backlog(&self) -> usize {
        lock(&self.queue.items).len()
    }

    /// Snapshots discarded for this subscriber by the backlog cap.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}
