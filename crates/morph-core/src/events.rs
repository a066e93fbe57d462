//! Structured events emitted by the engine through an injected sink.
//!
//! The engine never configures or writes to process-wide logging state.
//! Callers hand an [`EventSink`] to the entry points that want to report
//! progress and decide themselves where the events go.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Severity attached to an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Fine grained progress information.
    Debug,
    /// Milestones such as a committed basis.
    Info,
    /// Recoverable problems, e.g. the soft capacity warning.
    Warn,
}

/// A single structured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Severity of the event.
    pub level: Level,
    /// Component emitting the event (`optimizer`, `session`, ...).
    pub target: String,
    /// Short human readable message.
    pub message: String,
    /// Structured key value fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Event {
    /// Creates an event without fields.
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a structured field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }
}

/// Destination for engine events. Implementations must be thread safe since
/// optimizer workers may emit concurrently.
pub trait EventSink: Send + Sync {
    /// Receives one event.
    fn emit(&self, event: Event);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the collected events.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the collected events emitted by `target`.
    pub fn events_for(&self, target: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.target == target)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
