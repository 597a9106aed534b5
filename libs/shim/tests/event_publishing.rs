//! Publishing scheduling-core event records as orchestrator events:
//! unresolved objects are dropped, suppressed kinds never emit.


use std::time::Duration;

use gantry_model::PodPhase;
use gantry_shim::events::{ChangeDetail, ChangeType, EventRecord, RecordKind};
use gantry_shim::NodeLifecycle;
use harness::{app_request, node_for_test, pod_helper, start_shim, task_request, wait_until, TestShim};

fn node_record(object_id: &str, message: &str) -> EventRecord {
    EventRecord {
        kind: RecordKind::Node,
        change_type: ChangeType::Add,
        change_detail: ChangeDetail::None,
        object_id: object_id.to_string(),
        reference_id: String::new(),
        reason: String::new(),
        message: message.to_string(),
    }
}

async fn add_accepted_node(shim: &TestShim, node_id: &str) {
    shim.context.add_node(&node_for_test(node_id, "1G", "2")).await;
    assert!(
        wait_until(
            || async {
                shim.context.cache().node_lifecycle(node_id).await == Some(NodeLifecycle::Accepted)
            },
            Duration::from_secs(1),
        )
        .await,
        "node was not accepted"
    );
}

#[tokio::test]
async fn test_node_event_without_node_is_dropped() {
    let shim = start_shim().await;

    let message = "non_existing_node_related_message";
    shim.context
        .publish_events(vec![node_record("non_existing_host", message)])
        .await;

    assert!(!shim.recorder.contains_message(message));
    shim.stop().await;
}

#[tokio::test]
async fn test_node_event_published() {
    let shim = start_shim().await;
    add_accepted_node(&shim, "host0001").await;

    let message = "node_related_message";
    shim.context
        .publish_events(vec![node_record("host0001", message)])
        .await;

    assert!(shim.recorder.contains_message(message));
    shim.stop().await;
}

#[tokio::test]
async fn test_filtered_events_not_published() {
    let shim = start_shim().await;
    add_accepted_node(&shim, "host0001").await;
    let baseline = shim.recorder.events().len();

    let record = |kind, ct, cd, object_id: &str| EventRecord {
        kind,
        change_type: ct,
        change_detail: cd,
        object_id: object_id.to_string(),
        reference_id: String::new(),
        reason: String::new(),
        message: String::new(),
    };
    shim.context
        .publish_events(vec![
            record(RecordKind::Node, ChangeType::Set, ChangeDetail::NodeSchedulable, "host0001"),
            record(RecordKind::Node, ChangeType::Set, ChangeDetail::NodeOccupied, "host0001"),
            record(RecordKind::Node, ChangeType::Set, ChangeDetail::NodeCapacity, "host0001"),
            record(RecordKind::Node, ChangeType::Add, ChangeDetail::NodeAlloc, "host0001"),
            record(RecordKind::Application, ChangeType::Add, ChangeDetail::AppRunning, "app-1"),
            record(RecordKind::Queue, ChangeType::Add, ChangeDetail::None, "root.test"),
        ])
        .await;

    assert_eq!(shim.recorder.events().len(), baseline);
    shim.stop().await;
}

#[tokio::test]
async fn test_task_event_with_unknown_task_is_dropped() {
    let shim = start_shim().await;
    shim.context.add_application(app_request("app_event_12", "root.a")).await;

    let message = "event_related_text_msg";
    shim.context
        .publish_events(vec![EventRecord {
            kind: RecordKind::Task,
            change_type: ChangeType::None,
            change_detail: ChangeDetail::None,
            object_id: "non_existing_task_event".to_string(),
            reference_id: "app_event_12".to_string(),
            reason: String::new(),
            message: message.to_string(),
        }])
        .await;

    assert!(!shim.recorder.contains_message(message));
    shim.stop().await;
}

#[tokio::test]
async fn test_task_event_published() {
    let shim = start_shim().await;
    shim.context.add_application(app_request("app_event", "root.a")).await;
    shim.context
        .add_task(task_request(
            "app_event",
            "task_event",
            pod_helper("task-pod", "default", "task_event", "", "app_event", PodPhase::Pending),
        ))
        .await
        .unwrap();

    let message = "event_related_message";
    shim.context
        .publish_events(vec![EventRecord {
            kind: RecordKind::Task,
            change_type: ChangeType::None,
            change_detail: ChangeDetail::None,
            object_id: "task_event".to_string(),
            reference_id: "app_event".to_string(),
            reason: String::new(),
            message: message.to_string(),
        }])
        .await;

    assert!(shim.recorder.contains_message(message));
    shim.stop().await;
}

#[tokio::test]
async fn test_application_event_resolution() {
    let shim = start_shim().await;
    shim.context.add_application(app_request("app_event", "root.a")).await;

    let record = |object_id: &str, message: &str| EventRecord {
        kind: RecordKind::Application,
        change_type: ChangeType::Add,
        change_detail: ChangeDetail::None,
        object_id: object_id.to_string(),
        reference_id: String::new(),
        reason: String::new(),
        message: message.to_string(),
    };

    shim.context
        .publish_events(vec![
            record("app_event", "known_app_message"),
            record("missing_app", "unknown_app_message"),
        ])
        .await;

    assert!(shim.recorder.contains_message("known_app_message"));
    assert!(!shim.recorder.contains_message("unknown_app_message"));
    shim.stop().await;
}
