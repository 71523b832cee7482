//! # Warden Events
//!
//! Topic-based publish/subscribe bus used by every Warden subsystem to emit
//! state-change events and deliver notifications to subscribers.
//!
//! ## Features
//!
//! - **Topic matching** - exact topics, topic sets, and trailing-wildcard
//!   patterns (`"user.*"`)
//! - **Filters** - per-subscription source and priority filters
//! - **Deterministic delivery** - handlers run sequentially in registration
//!   order; `emit` returns once every handler has completed
//! - **Re-entrancy safe** - events emitted from inside a handler are queued
//!   and delivered after the current emission finishes
//! - **Isolation** - a panicking handler is logged and does not abort
//!   delivery to the remaining subscribers
//! - **Stats** - monotonic counters for emitted/delivered/notified
//!
//! ## Usage
//!
//! ```rust
//! use warden_events::{EventBus, Event, handler};
//! use serde_json::json;
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let sub = bus
//!     .subscribe("user.*", handler(|event: Event| async move {
//!         println!("{} from {}", event.topic, event.source);
//!     }))
//!     .await;
//!
//! bus.emit_new("user.login", "auth", json!({"user_id": "42"})).await;
//! bus.unsubscribe(&sub).await;
//! # }
//! ```

mod bus;
mod event;
mod topic;

pub use bus::{BusStats, EventBus, EventHandler, SubscribeOptions, Subscription, handler};
pub use event::{Event, EventPriority};
pub use topic::TopicSpec;
