//! The event bus.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

use crate::event::{Event, EventPriority};
use crate::topic::TopicSpec;

/// Boxed asynchronous event handler.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Optional per-subscription filters.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Only deliver events whose source is in this set
    pub source_filter: Option<HashSet<String>>,
    /// Only deliver events whose priority is in this set
    pub priority_filter: Option<HashSet<EventPriority>>,
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

/// Snapshot of the bus counters. All values are monotonically increasing
/// until [`EventBus::reset_stats`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Events handed to `emit`
    pub events_emitted: u64,
    /// Events fully dispatched to their matching subscribers
    pub events_delivered: u64,
    /// Individual handler invocations that completed
    pub subscribers_notified: u64,
}

struct Subscriber {
    id: u64,
    spec: TopicSpec,
    options: SubscribeOptions,
    handler: EventHandler,
}

impl Subscriber {
    fn matches(&self, event: &Event) -> bool {
        if !self.spec.matches(&event.topic) {
            return false;
        }
        if let Some(sources) = &self.options.source_filter
            && !sources.contains(&event.source)
        {
            return false;
        }
        if let Some(priorities) = &self.options.priority_filter
            && !priorities.contains(&event.priority)
        {
            return false;
        }
        true
    }
}

/// Topic-based publish/subscribe bus.
///
/// Delivery within a single emission is sequential in registration order.
/// Events emitted from inside a handler are queued and delivered after the
/// current emission completes, so the bus never recurses.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    /// Events waiting for delivery; drained by whichever emitter holds
    /// `delivery`.
    pending: Mutex<VecDeque<Event>>,
    delivery: Mutex<()>,
    events_emitted: AtomicU64,
    events_delivered: AtomicU64,
    subscribers_notified: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
            delivery: Mutex::new(()),
            events_emitted: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            subscribers_notified: AtomicU64::new(0),
        }
    }

    /// Subscribe a handler to a topic spec.
    pub async fn subscribe(&self, spec: impl Into<TopicSpec>, handler: EventHandler) -> Subscription {
        self.subscribe_with(spec, SubscribeOptions::default(), handler)
            .await
    }

    /// Subscribe with source/priority filters.
    pub async fn subscribe_with(
        &self,
        spec: impl Into<TopicSpec>,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spec = spec.into();
        debug!(target: "warden::events", subscription = id, spec = ?spec, "subscriber registered");
        self.subscribers.write().await.push(Subscriber {
            id,
            spec,
            options,
            handler,
        });
        Subscription { id }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription.id);
        before != subscribers.len()
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Emit an event, awaiting delivery to every matching subscriber.
    ///
    /// Returns the number of handlers notified by this call. When called
    /// from inside a handler the event is queued for the outer emission and
    /// `0` is returned immediately.
    pub async fn emit(&self, event: Event) -> usize {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().await.push_back(event);
        self.drain().await
    }

    /// Create and emit an event in one step, returning the emitted event.
    pub async fn emit_new(
        &self,
        topic: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Event {
        let event = Event::new(topic, source, data);
        self.emit(event.clone()).await;
        event
    }

    /// Fire-and-forget emission: delivery happens on a spawned task.
    pub fn dispatch(self: &Arc<Self>, event: Event) {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            bus.emit(event).await;
        });
    }

    /// Current counter values.
    pub fn stats(&self) -> BusStats {
        BusStats {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            subscribers_notified: self.subscribers_notified.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters (test support).
    pub fn reset_stats(&self) {
        self.events_emitted.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.subscribers_notified.store(0, Ordering::Relaxed);
    }

    /// Drain the pending queue if no other emission is doing so.
    async fn drain(&self) -> usize {
        let mut notified = 0;
        loop {
            let Ok(guard) = self.delivery.try_lock() else {
                // The emission currently holding the lock drains our event.
                return notified;
            };
            loop {
                let next = self.pending.lock().await.pop_front();
                match next {
                    Some(event) => notified += self.deliver(event).await,
                    None => break,
                }
            }
            drop(guard);
            // Another emitter may have enqueued while we released the lock.
            if self.pending.lock().await.is_empty() {
                return notified;
            }
        }
    }

    async fn deliver(&self, event: Event) -> usize {
        let matching: Vec<(u64, EventHandler)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .filter(|s| s.matches(&event))
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect()
        };
        debug!(
            target: "warden::events",
            topic = %event.topic,
            matching = matching.len(),
            "delivering event"
        );

        let mut notified = 0;
        for (id, handler) in matching {
            match AssertUnwindSafe(handler(event.clone())).catch_unwind().await {
                Ok(()) => notified += 1,
                Err(_) => {
                    error!(
                        target: "warden::events",
                        subscription = id,
                        topic = %event.topic,
                        "event handler panicked; continuing delivery"
                    );
                }
            }
        }

        self.events_delivered.fetch_add(1, Ordering::Relaxed);
        self.subscribers_notified
            .fetch_add(notified as u64, Ordering::Relaxed);
        notified
    }
}
