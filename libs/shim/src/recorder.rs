//! Orchestrator event publishing interface.
//!
//! The recorder back-end (aggregation, rate limiting, API writes) is the
//! orchestrator client's problem; the shim only needs a publish call
//! tied to a resolved object reference.

use std::sync::Mutex;

/// Kind of the object an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Node,
    Pod,
    Application,
}

/// Reference to the resolved object an event is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventObjectRef {
    pub kind: ReferenceKind,
    pub id: String,
}

pub trait EventRecorder: Send + Sync {
    fn publish(&self, object: &EventObjectRef, reason: &str, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: EventObjectRef,
    pub reason: String,
    pub message: String,
}

/// Recorder collecting events in memory for assertions.
#[derive(Default)]
pub struct MockEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MockEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains_message(&self, fragment: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.message.contains(fragment))
    }
}

impl EventRecorder for MockEventRecorder {
    fn publish(&self, object: &EventObjectRef, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: object.clone(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
