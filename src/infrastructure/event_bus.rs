//! In-process publish/subscribe bus.
//!
//! Two consumer shapes share one publish path: registered listeners get a
//! synchronous callback (and must not block), while SSE subscribers each
//! own a bounded queue drained by their connection task. Backpressure
//! drops the oldest non-critical frames first; critical alerts are never
//! dropped, and a `dropped` frame tells the subscriber how many it missed.

use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::events::{BusEvent, EventKind, EventListener};

pub const DEFAULT_MAX_SUBSCRIBERS: usize = 100;
pub const DEFAULT_BUFFER_LIMIT: usize = 256;

struct SubscriberQueue {
    queue: Mutex<VecDeque<BusEvent>>,
    dropped: AtomicU64,
    notify: Notify,
}

struct BusInner {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    subscribers: RwLock<HashMap<u64, Arc<SubscriberQueue>>>,
    next_id: AtomicU64,
    max_subscribers: usize,
    buffer_limit: usize,
}

/// Cheap-to-clone handle; all clones share the same listener and
/// subscriber sets.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SUBSCRIBERS, DEFAULT_BUFFER_LIMIT)
    }

    pub fn with_limits(max_subscribers: usize, buffer_limit: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_subscribers,
                buffer_limit,
            }),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    /// Publish to every listener and subscriber queue. Synchronous and
    /// non-blocking: listener callbacks must offload their own work.
    pub fn publish(&self, event: BusEvent) {
        for listener in self.inner.listeners.read().unwrap().iter() {
            listener.on_event(&event);
        }

        let subscribers = self.inner.subscribers.read().unwrap();
        for sub in subscribers.values() {
            let mut queue = sub.queue.lock().unwrap();
            if queue.len() >= self.inner.buffer_limit {
                // Shed the oldest non-critical frame; critical frames ride
                // out the congestion even past the nominal limit.
                if let Some(pos) = queue.iter().position(|e| !e.critical) {
                    queue.remove(pos);
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            queue.push_back(event.clone());
            drop(queue);
            sub.notify.notify_one();
        }
    }

    /// Open a subscriber slot; `None` when the bus is at capacity (the
    /// HTTP layer answers 503).
    pub fn subscribe(&self) -> Option<Subscription> {
        let mut subscribers = self.inner.subscribers.write().unwrap();
        if subscribers.len() >= self.inner.max_subscribers {
            return None;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        });
        subscribers.insert(id, Arc::clone(&queue));
        debug!(id, total = subscribers.len(), "sse subscriber registered");
        Some(Subscription {
            id,
            bus: Arc::clone(&self.inner),
            queue,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().unwrap().len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One SSE subscriber's end of the bus. Dropping it unregisters the
/// subscriber and frees its slot.
pub struct Subscription {
    id: u64,
    bus: Arc<BusInner>,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Next frame, waiting if the queue is empty. A pending dropped-count
    /// is reported first so the subscriber learns about the gap in order.
    pub async fn recv(&self) -> BusEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<BusEvent> {
        let dropped = self.queue.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            return Some(BusEvent::new(
                EventKind::Dropped,
                json!({ "count": dropped }),
            ));
        }
        self.queue.queue.lock().unwrap().pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subscribers) = self.bus.subscribers.write() {
            subscribers.remove(&self.id);
            debug!(id = self.id, "sse subscriber removed");
        }
    }
}
