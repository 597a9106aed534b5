//! Scheduling-core event records and the suppression filter.
//!
//! The core reports fine-grained state changes; only a subset is worth
//! surfacing as orchestrator events. The suppression set below is a
//! literal list: high-frequency bookkeeping records (node occupancy and
//! capacity flips, allocation deltas, running-count deltas, queue
//! lifecycle) never reach the recorder.

use serde::{Deserialize, Serialize};

/// Kind of object a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Node,
    Application,
    Task,
    Queue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    #[default]
    None,
    Add,
    Remove,
    Set,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeDetail {
    #[default]
    None,
    NodeSchedulable,
    NodeOccupied,
    NodeCapacity,
    NodeAlloc,
    AppRunning,
}

/// One event record emitted by the scheduling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: RecordKind,
    #[serde(default)]
    pub change_type: ChangeType,
    #[serde(default)]
    pub change_detail: ChangeDetail,
    /// Node id, application id, or task id depending on `kind`.
    pub object_id: String,
    /// For task records, the owning application id.
    #[serde(default)]
    pub reference_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Whether a record is suppressed and must not be published.
pub(crate) fn is_filtered(record: &EventRecord) -> bool {
    match record.kind {
        RecordKind::Queue => true,
        RecordKind::Node => matches!(
            (record.change_type, record.change_detail),
            (ChangeType::Set, ChangeDetail::NodeSchedulable)
                | (ChangeType::Set, ChangeDetail::NodeOccupied)
                | (ChangeType::Set, ChangeDetail::NodeCapacity)
                | (ChangeType::Add, ChangeDetail::NodeAlloc)
                | (ChangeType::Remove, ChangeDetail::NodeAlloc)
        ),
        RecordKind::Application => matches!(
            (record.change_type, record.change_detail),
            (ChangeType::Add, ChangeDetail::AppRunning)
                | (ChangeType::Remove, ChangeDetail::AppRunning)
        ),
        RecordKind::Task => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: RecordKind, ct: ChangeType, cd: ChangeDetail) -> EventRecord {
        EventRecord {
            kind,
            change_type: ct,
            change_detail: cd,
            object_id: "obj".to_string(),
            reference_id: String::new(),
            reason: String::new(),
            message: String::new(),
        }
    }

    #[test]
    fn test_suppressed_records() {
        let filtered = [
            record(RecordKind::Node, ChangeType::Set, ChangeDetail::NodeSchedulable),
            record(RecordKind::Node, ChangeType::Set, ChangeDetail::NodeOccupied),
            record(RecordKind::Node, ChangeType::Set, ChangeDetail::NodeCapacity),
            record(RecordKind::Node, ChangeType::Add, ChangeDetail::NodeAlloc),
            record(RecordKind::Node, ChangeType::Remove, ChangeDetail::NodeAlloc),
            record(RecordKind::Application, ChangeType::Add, ChangeDetail::AppRunning),
            record(RecordKind::Application, ChangeType::Remove, ChangeDetail::AppRunning),
            record(RecordKind::Queue, ChangeType::Add, ChangeDetail::None),
            record(RecordKind::Queue, ChangeType::Remove, ChangeDetail::None),
        ];
        for r in &filtered {
            assert!(is_filtered(r), "{:?} should be filtered", r);
        }
    }

    #[test]
    fn test_published_records() {
        let published = [
            record(RecordKind::Node, ChangeType::Add, ChangeDetail::None),
            record(RecordKind::Node, ChangeType::Remove, ChangeDetail::None),
            record(RecordKind::Application, ChangeType::Add, ChangeDetail::None),
            record(RecordKind::Task, ChangeType::Add, ChangeDetail::None),
            record(RecordKind::Task, ChangeType::Set, ChangeDetail::None),
        ];
        for r in &published {
            assert!(!is_filtered(r), "{:?} should pass the filter", r);
        }
    }
}
