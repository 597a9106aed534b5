//! Per-pod task state machine.
//!
//! Transitions are a pure table; side effects run on entry to the new
//! state. A task created from a pod that is already bound records the
//! existing allocation and skips the orchestrator bind when the
//! allocation callback arrives.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use gantry_model::{Pod, PodCondition};

use crate::dispatcher::{Dispatcher, ShimEvent, TaskEvent, TaskEventPayload};
use crate::orchestrator::Orchestrator;
use crate::recorder::{EventObjectRef, EventRecorder, ReferenceKind};

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Pending,
    Scheduling,
    Allocated,
    Bound,
    Completed,
    Failed,
    Rejected,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::New => "New",
            TaskState::Pending => "Pending",
            TaskState::Scheduling => "Scheduling",
            TaskState::Allocated => "Allocated",
            TaskState::Bound => "Bound",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
            TaskState::Rejected => "Rejected",
        }
    }
}

/// The transition table. Returns `None` for illegal combinations; the
/// caller logs and drops those events.
pub(crate) fn transition(state: TaskState, event: &TaskEvent) -> Option<TaskState> {
    use TaskState::*;
    match (state, event) {
        (New, TaskEvent::Init) => Some(Pending),
        (Pending, TaskEvent::Schedule) => Some(Scheduling),
        (Scheduling, TaskEvent::Allocated { .. }) => Some(Allocated),
        (Allocated, TaskEvent::Bound) => Some(Bound),
        (state, TaskEvent::Complete) if !state.is_terminal() => Some(Completed),
        (state, TaskEvent::Fail { .. }) if !state.is_terminal() => Some(Failed),
        (state, TaskEvent::Reject { .. }) if !state.is_terminal() => Some(Rejected),
        _ => None,
    }
}

/// Handles a task needs for its entry actions.
#[derive(Clone)]
pub(crate) struct TaskEnv {
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub recorder: Arc<dyn EventRecorder>,
}

struct TaskInner {
    state: TaskState,
    pod: Pod,
    allocation_key: Option<String>,
    node_id: Option<String>,
}

/// A schedulable unit, one-to-one with a pod. The task id equals the pod
/// uid; the owning application is referenced by id only.
pub struct Task {
    task_id: String,
    application_id: String,
    alias: String,
    inner: RwLock<TaskInner>,
}

impl Task {
    pub fn new(task_id: &str, application_id: &str, pod: Pod) -> Self {
        let alias = pod.alias();
        Self {
            task_id: task_id.to_string(),
            application_id: application_id.to_string(),
            alias,
            inner: RwLock::new(TaskInner {
                state: TaskState::New,
                pod,
                allocation_key: None,
                node_id: None,
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub async fn state(&self) -> TaskState {
        self.inner.read().await.state
    }

    pub async fn pod(&self) -> Pod {
        self.inner.read().await.pod.clone()
    }

    pub async fn allocation_key(&self) -> Option<String> {
        self.inner.read().await.allocation_key.clone()
    }

    pub async fn node_id(&self) -> Option<String> {
        self.inner.read().await.node_id.clone()
    }

    /// Force a state. Recovery and tests only; no entry actions run.
    pub async fn set_state(&self, state: TaskState) {
        self.inner.write().await.state = state;
    }

    /// Record an allocation that already exists in the cluster. Used when
    /// the task is created from a pod bound before the shim started.
    pub(crate) async fn record_existing_allocation(&self, allocation_key: &str, node_id: &str) {
        let mut inner = self.inner.write().await;
        inner.allocation_key = Some(allocation_key.to_string());
        inner.node_id = Some(node_id.to_string());
    }

    /// Update the pod-condition watermark. Returns true when the
    /// condition is new or its status changed.
    pub(crate) async fn maybe_update_pod_condition(&self, condition: &PodCondition) -> bool {
        let mut inner = self.inner.write().await;
        let conditions = &mut inner.pod.status.conditions;
        match conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing == condition {
                    false
                } else {
                    *existing = condition.clone();
                    true
                }
            }
            None => {
                conditions.push(condition.clone());
                true
            }
        }
    }

    /// Drive the state machine with one event.
    pub(crate) async fn handle(&self, event: TaskEvent, env: &TaskEnv) {
        let to = {
            let mut inner = self.inner.write().await;
            let from = inner.state;
            let Some(to) = transition(from, &event) else {
                warn!(
                    task_id = %self.task_id,
                    state = from.as_str(),
                    event = ?event,
                    "Illegal task transition, dropping event"
                );
                return;
            };
            inner.state = to;
            if let TaskEvent::Allocated {
                node_id,
                allocation_key,
            } = &event
            {
                inner.node_id = Some(node_id.clone());
                inner.allocation_key = Some(allocation_key.clone());
            }
            debug!(
                task_id = %self.task_id,
                from = from.as_str(),
                to = to.as_str(),
                "Task transition"
            );
            to
        };
        self.on_enter(to, &event, env).await;
    }

    async fn on_enter(&self, state: TaskState, event: &TaskEvent, env: &TaskEnv) {
        match state {
            TaskState::Allocated => self.on_allocated(env).await,
            TaskState::Bound => {
                let node = self.node_id().await.unwrap_or_default();
                env.recorder.publish(
                    &EventObjectRef {
                        kind: ReferenceKind::Pod,
                        id: self.task_id.clone(),
                    },
                    "TaskBound",
                    &format!("task {} is bound to node {}", self.alias, node),
                );
            }
            TaskState::Failed => {
                if let TaskEvent::Fail { reason } = event {
                    warn!(task_id = %self.task_id, reason = %reason, "Task failed");
                }
            }
            TaskState::Rejected => {
                if let TaskEvent::Reject { reason } = event {
                    warn!(
                        task_id = %self.task_id,
                        reason = %reason,
                        "Task rejected by the scheduling core"
                    );
                }
            }
            _ => {}
        }
    }

    async fn on_allocated(&self, env: &TaskEnv) {
        let (already_bound, node_id) = {
            let inner = self.inner.read().await;
            (inner.pod.is_assigned(), inner.node_id.clone())
        };
        let Some(node_id) = node_id else {
            return;
        };

        if already_bound {
            // Recovery: the orchestrator bound this pod before we started.
            debug!(task_id = %self.task_id, node_id = %node_id, "Pod already bound, skipping bind");
            self.dispatch_self(env, TaskEvent::Bound).await;
            return;
        }

        match env.orchestrator.bind_pod(&self.task_id, &node_id).await {
            Ok(()) => self.dispatch_self(env, TaskEvent::Bound).await,
            Err(e) => {
                warn!(task_id = %self.task_id, node_id = %node_id, error = %e, "Pod bind failed");
                self.dispatch_self(
                    env,
                    TaskEvent::Fail {
                        reason: format!("bind failed: {}", e),
                    },
                )
                .await;
            }
        }
    }

    async fn dispatch_self(&self, env: &TaskEnv, event: TaskEvent) {
        env.dispatcher
            .dispatch(ShimEvent::Task(TaskEventPayload {
                application_id: self.application_id.clone(),
                task_id: self.task_id.clone(),
                event,
            }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_model::{ObjectMeta, PodStatus};

    fn pod_with_condition(condition: PodCondition) -> Pod {
        Pod {
            meta: ObjectMeta {
                name: "pod-1".to_string(),
                namespace: "default".to_string(),
                uid: "uid-1".to_string(),
                ..Default::default()
            },
            status: PodStatus {
                conditions: vec![condition],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        use TaskState::*;
        let allocated = TaskEvent::Allocated {
            node_id: "host1".to_string(),
            allocation_key: "key".to_string(),
        };
        assert_eq!(transition(New, &TaskEvent::Init), Some(Pending));
        assert_eq!(transition(Pending, &TaskEvent::Schedule), Some(Scheduling));
        assert_eq!(transition(Scheduling, &allocated), Some(Allocated));
        assert_eq!(transition(Allocated, &TaskEvent::Bound), Some(Bound));
    }

    #[test]
    fn test_terminal_events_from_any_live_state() {
        use TaskState::*;
        for state in [New, Pending, Scheduling, Allocated, Bound] {
            assert_eq!(transition(state, &TaskEvent::Complete), Some(Completed));
            assert_eq!(
                transition(
                    state,
                    &TaskEvent::Fail {
                        reason: "x".to_string()
                    }
                ),
                Some(Failed)
            );
            assert_eq!(
                transition(
                    state,
                    &TaskEvent::Reject {
                        reason: "x".to_string()
                    }
                ),
                Some(Rejected)
            );
        }
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        use TaskState::*;
        for state in [Completed, Failed, Rejected] {
            assert_eq!(transition(state, &TaskEvent::Init), None);
            assert_eq!(transition(state, &TaskEvent::Complete), None);
            assert_eq!(
                transition(
                    state,
                    &TaskEvent::Fail {
                        reason: "x".to_string()
                    }
                ),
                None
            );
        }
    }

    #[test]
    fn test_out_of_order_events_are_illegal() {
        use TaskState::*;
        let allocated = TaskEvent::Allocated {
            node_id: "host1".to_string(),
            allocation_key: "key".to_string(),
        };
        assert_eq!(transition(New, &TaskEvent::Schedule), None);
        assert_eq!(transition(New, &allocated), None);
        assert_eq!(transition(Pending, &TaskEvent::Bound), None);
        assert_eq!(transition(Bound, &allocated), None);
    }

    #[tokio::test]
    async fn test_pod_condition_watermark() {
        let condition = PodCondition {
            condition_type: "ContainersReady".to_string(),
            status: "True".to_string(),
            ..Default::default()
        };
        let task = Task::new("uid-1", "app00001", pod_with_condition(condition.clone()));

        // Identical condition: no change.
        assert!(!task.maybe_update_pod_condition(&condition).await);

        // Status flip: change.
        let mut flipped = condition.clone();
        flipped.status = "False".to_string();
        assert!(task.maybe_update_pod_condition(&flipped).await);

        // New condition type: change.
        let other = PodCondition {
            condition_type: "PodScheduled".to_string(),
            status: "False".to_string(),
            ..Default::default()
        };
        assert!(task.maybe_update_pod_condition(&other).await);
    }

    #[tokio::test]
    async fn test_existing_allocation_recorded() {
        let task = Task::new("uid-1", "app00001", Pod::default());
        task.record_existing_allocation("uid-1", "host1").await;
        assert_eq!(task.allocation_key().await.as_deref(), Some("uid-1"));
        assert_eq!(task.node_id().await.as_deref(), Some("host1"));
        assert_eq!(task.state().await, TaskState::New);
    }
}
