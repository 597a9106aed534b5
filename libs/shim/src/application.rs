//! Per-application state machine and schedule tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use gantry_model::Resource;

use crate::client::{AllocationAsk, SchedulerApi, UpdateAllocationRequest};
use crate::dispatcher::{ApplicationEvent, TaskEvent};
use crate::task::{Task, TaskEnv, TaskState};

/// Application lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    New,
    Submitted,
    Accepted,
    Running,
    Completing,
    Completed,
    Failed,
    Killed,
}

impl ApplicationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationState::Completed | ApplicationState::Failed | ApplicationState::Killed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationState::New => "New",
            ApplicationState::Submitted => "Submitted",
            ApplicationState::Accepted => "Accepted",
            ApplicationState::Running => "Running",
            ApplicationState::Completing => "Completing",
            ApplicationState::Completed => "Completed",
            ApplicationState::Failed => "Failed",
            ApplicationState::Killed => "Killed",
        }
    }
}

/// The transition table. `None` marks an illegal combination.
pub(crate) fn transition(
    state: ApplicationState,
    event: &ApplicationEvent,
) -> Option<ApplicationState> {
    use ApplicationState::*;
    match (state, event) {
        (New, ApplicationEvent::Submit) => Some(Submitted),
        (Submitted, ApplicationEvent::Accept) => Some(Accepted),
        (Accepted, ApplicationEvent::Run) => Some(Running),
        (Running, ApplicationEvent::Completing) => Some(Completing),
        (Completing, ApplicationEvent::Complete) => Some(Completed),
        (state, ApplicationEvent::Fail) if !state.is_terminal() => Some(Failed),
        (state, ApplicationEvent::Kill) if !state.is_terminal() => Some(Killed),
        _ => None,
    }
}

struct AppInner {
    state: ApplicationState,
    tasks: HashMap<String, Arc<Task>>,
}

/// A logical group of tasks sharing a queue, user, and tags.
pub struct Application {
    application_id: String,
    queue: String,
    user: String,
    groups: Vec<String>,
    tags: BTreeMap<String, String>,
    scheduler_api: Arc<dyn SchedulerApi>,
    inner: RwLock<AppInner>,
}

impl Application {
    pub fn new(
        application_id: &str,
        queue: &str,
        user: &str,
        groups: Vec<String>,
        tags: BTreeMap<String, String>,
        scheduler_api: Arc<dyn SchedulerApi>,
    ) -> Self {
        Self {
            application_id: application_id.to_string(),
            queue: queue.to_string(),
            user: user.to_string(),
            groups,
            tags,
            scheduler_api,
            inner: RwLock::new(AppInner {
                state: ApplicationState::New,
                tasks: HashMap::new(),
            }),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|s| s.as_str())
    }

    pub async fn state(&self) -> ApplicationState {
        self.inner.read().await.state
    }

    /// Force a state. Recovery and tests only.
    pub async fn set_state(&self, state: ApplicationState) {
        self.inner.write().await.state = state;
    }

    /// Drive the state machine with one event.
    pub(crate) async fn handle_event(&self, event: ApplicationEvent) {
        let mut inner = self.inner.write().await;
        let from = inner.state;
        match transition(from, &event) {
            Some(to) => {
                inner.state = to;
                debug!(
                    application_id = %self.application_id,
                    from = from.as_str(),
                    to = to.as_str(),
                    "Application transition"
                );
            }
            None => {
                warn!(
                    application_id = %self.application_id,
                    state = from.as_str(),
                    event = ?event,
                    "Illegal application transition, dropping event"
                );
            }
        }
    }

    /// Attach a task, returning the existing one on id collision.
    pub(crate) async fn add_task(&self, task: Arc<Task>) -> Arc<Task> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get(task.task_id()) {
            Some(existing) => {
                debug!(
                    application_id = %self.application_id,
                    task_id = task.task_id(),
                    "Task already exists, returning existing"
                );
                Arc::clone(existing)
            }
            None => {
                inner
                    .tasks
                    .insert(task.task_id().to_string(), Arc::clone(&task));
                task
            }
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Arc<Task>> {
        self.inner.read().await.tasks.get(task_id).cloned()
    }

    pub(crate) async fn remove_task(&self, task_id: &str) {
        self.inner.write().await.tasks.remove(task_id);
    }

    pub async fn tasks(&self) -> Vec<Arc<Task>> {
        self.inner.read().await.tasks.values().cloned().collect()
    }

    pub async fn tasks_in_state(&self, state: TaskState) -> Vec<Arc<Task>> {
        let tasks = self.tasks().await;
        let mut matching = Vec::new();
        for task in tasks {
            if task.state().await == state {
                matching.push(task);
            }
        }
        matching
    }

    /// Aliases of tasks still in a non-terminated state. Empty means the
    /// application is safe to remove.
    pub async fn non_terminated_task_aliases(&self) -> Vec<String> {
        let tasks = self.tasks().await;
        let mut aliases = Vec::new();
        for task in tasks {
            if !task.state().await.is_terminal() {
                aliases.push(task.alias().to_string());
            }
        }
        aliases.sort();
        aliases
    }

    /// One schedule tick: prune terminated tasks, init new ones, move
    /// pending ones to scheduling, and send their asks to the core.
    pub(crate) async fn schedule(&self, env: &TaskEnv) {
        let state = self.state().await;
        if state != ApplicationState::Running {
            debug!(
                application_id = %self.application_id,
                state = state.as_str(),
                "Skipping schedule tick, application not running"
            );
            return;
        }

        let tasks = self.tasks().await;

        // Terminated tasks have nothing left to do here.
        let mut terminated = Vec::new();
        for task in &tasks {
            if task.state().await.is_terminal() {
                terminated.push(task.task_id().to_string());
            }
        }
        if !terminated.is_empty() {
            let mut inner = self.inner.write().await;
            for task_id in &terminated {
                inner.tasks.remove(task_id);
            }
        }

        for task in &tasks {
            if task.state().await == TaskState::New {
                task.handle(TaskEvent::Init, env).await;
            }
        }

        let mut asks = Vec::new();
        for task in &tasks {
            if task.state().await != TaskState::Pending {
                continue;
            }
            task.handle(TaskEvent::Schedule, env).await;
            let pod = task.pod().await;
            let resource = pod.requests().unwrap_or_else(|e| {
                warn!(
                    task_id = task.task_id(),
                    error = %e,
                    "Unparseable pod requests, asking with empty resource"
                );
                Resource::new()
            });
            asks.push(AllocationAsk {
                application_id: self.application_id.clone(),
                allocation_key: task.task_id().to_string(),
                node_id: task.node_id().await,
                resource,
            });
        }

        if asks.is_empty() {
            return;
        }
        debug!(
            application_id = %self.application_id,
            asks = asks.len(),
            "Sending allocation asks"
        );
        if let Err(e) = self
            .scheduler_api
            .update_allocation(UpdateAllocationRequest { allocations: asks })
            .await
        {
            warn!(
                application_id = %self.application_id,
                error = %e,
                "Allocation request failed, transport will retry"
            );
        }
    }
}
