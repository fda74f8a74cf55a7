//! Notification events
//!
//! Events are informational only. Conditions in the object status remain the
//! source of truth for reconciliation outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// `<kind>/<name>` of the object the event is about
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);

    fn normal(&self, object: &str, reason: &str, message: &str) {
        self.record(Event {
            object: object.to_string(),
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    fn warning(&self, object: &str, reason: &str, message: &str) {
        self.record(Event {
            object: object.to_string(),
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => tracing::info!(
                object = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                object = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps events in memory for later inspection
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reasons of recorded events, oldest first
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        tracing::trace!(reason = %event.reason, "Recorded event");
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
