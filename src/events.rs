//! In-process event bus
//!
//! Fans settlement and webhook state changes out to live subscribers per
//! operator, and keeps a bounded FIFO of recent events per operator so a
//! reconnecting stream can resume from its last seen id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub const DEFAULT_BUFFER_SIZE: usize = 100;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;

/// Ephemeral event; never persisted
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SseEvent {
    /// Monotonic within one bus
    pub id: String,
    pub operator_id: i64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventBusStats {
    pub published: u64,
    /// Deliveries skipped because a subscriber channel was full
    pub dropped: u64,
    pub subscribers: usize,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<i64, Vec<(u64, mpsc::Sender<SseEvent>)>>,
    buffers: HashMap<i64, VecDeque<SseEvent>>,
}

struct BusInner {
    state: RwLock<BusState>,
    buffer_size: usize,
    subscriber_capacity: usize,
    next_event_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Cheap to clone; clones share the same subscribers and buffers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(buffer_size: usize, subscriber_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: RwLock::new(BusState::default()),
                buffer_size: buffer_size.max(1),
                subscriber_capacity: subscriber_capacity.max(1),
                next_event_id: AtomicU64::new(1),
                next_subscriber_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Buffer and fan out an event. Never blocks on a slow subscriber.
    pub fn publish(
        &self,
        operator_id: i64,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> SseEvent {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);

        // Ids are assigned under the lock so buffer order matches id order.
        let event = SseEvent {
            id: self.inner.next_event_id.fetch_add(1, Ordering::SeqCst).to_string(),
            operator_id,
            event_type: event_type.into(),
            data,
            created_at: Utc::now(),
        };

        let buffer = state.buffers.entry(operator_id).or_default();
        buffer.push_back(event.clone());
        while buffer.len() > self.inner.buffer_size {
            buffer.pop_front();
        }

        if let Some(subs) = state.subscribers.get(&operator_id) {
            for (subscriber_id, tx) in subs {
                if tx.try_send(event.clone()).is_err() {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(operator_id, subscriber_id, event_id = %event.id, "Subscriber full, event dropped");
                }
            }
        }
        drop(state);

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        debug!(operator_id, event_id = %event.id, event_type = %event.event_type, "Event published");
        event
    }

    /// Register a bounded channel for one operator's events
    pub fn subscribe(&self, operator_id: i64) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_capacity);
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .entry(operator_id)
            .or_default()
            .push((id, tx));

        debug!(operator_id, subscriber_id = id, "Subscriber registered");
        Subscription {
            operator_id,
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove and close a subscriber channel. Unknown ids are ignored.
    pub fn unsubscribe(&self, operator_id: i64, subscriber_id: u64) {
        remove_subscriber(&self.inner, operator_id, subscriber_id);
    }

    /// Buffered events strictly after `last_event_id`, oldest first.
    ///
    /// `None` or an empty id returns the whole buffer; an id that is no
    /// longer buffered (or is the newest) returns nothing.
    pub fn replay_since(&self, operator_id: i64, last_event_id: Option<&str>) -> Vec<SseEvent> {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(buffer) = state.buffers.get(&operator_id) else {
            return Vec::new();
        };

        match last_event_id.filter(|id| !id.is_empty()) {
            None => buffer.iter().cloned().collect(),
            Some(last) => match buffer.iter().position(|e| e.id == last) {
                Some(pos) => buffer.iter().skip(pos + 1).cloned().collect(),
                None => Vec::new(),
            },
        }
    }

    pub fn subscriber_count(&self, operator_id: i64) -> usize {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .get(&operator_id)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> EventBusStats {
        let subscribers = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .values()
            .map(Vec::len)
            .sum();

        EventBusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers,
        }
    }
}

fn remove_subscriber(inner: &BusInner, operator_id: i64, subscriber_id: u64) {
    let mut state = inner.state.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(subs) = state.subscribers.get_mut(&operator_id) {
        let before = subs.len();
        // Dropping the sender closes the receiving side.
        subs.retain(|(id, _)| *id != subscriber_id);
        if subs.len() != before {
            debug!(operator_id, subscriber_id, "Subscriber removed");
        }
        if subs.is_empty() {
            state.subscribers.remove(&operator_id);
        }
    }
}

/// Live feed for one operator. Unsubscribes itself when dropped, so a
/// stream that goes away releases its channel.
pub struct Subscription {
    operator_id: i64,
    id: u64,
    rx: mpsc::Receiver<SseEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operator_id(&self) -> i64 {
        self.operator_id
    }

    /// Next event, or `None` once the subscription has been removed
    pub async fn recv(&mut self) -> Option<SseEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SseEvent> {
        self.rx.try_recv().ok()
    }
}

impl futures::Stream for Subscription {
    type Item = SseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            remove_subscriber(&inner, self.operator_id, self.id);
        }
    }
}
