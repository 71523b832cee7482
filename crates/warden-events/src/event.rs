//! Event record and priority levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// Priority attached to an event at emission time.
///
/// Priorities do not reorder delivery; they exist so subscribers can filter
/// for urgent traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// An event flowing through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub event_id: Uuid,
    /// Dot-separated topic, e.g. `user.login`
    pub topic: String,
    /// Identifier of the emitting component
    pub source: String,
    /// Event payload
    pub data: serde_json::Value,
    /// Priority level
    pub priority: EventPriority,
    /// Optional id of a causally-parent event
    pub parent_id: Option<Uuid>,
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
    /// Additional metadata
    pub metadata: Metadata,
}

impl Event {
    /// Create a new event with normal priority and the current timestamp.
    pub fn new(
        topic: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            topic: topic.into(),
            source: source.into(),
            data,
            priority: EventPriority::Normal,
            parent_id: None,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark another event as the causal parent of this one.
    #[must_use]
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
