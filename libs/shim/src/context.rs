//! The context: facade over the scheduler cache, the application and
//! task state machines, and the external interfaces.
//!
//! Informer callbacks land here, mutate the cache, and fan out to the
//! scheduling core and the dispatcher. Scheduling-core callbacks arrive
//! as dispatcher events and are routed back into the state machines.
//!
//! Lock order is context before cache, and no lock is held across an
//! outbound call; state is copied out first.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use gantry_model::{Node, Pod, PodCondition, Resource, Tombstone};

use crate::application::Application;
use crate::cache::{NodeLifecycle, OccupiedOp, OccupiedUpdate, SchedulerCache};
use crate::client::{
    ApplicationRegistration, NodeAction, NodeInfo, SchedulerApi, UpdateApplicationRequest,
    UpdateNodeRequest,
};
use crate::config::ShimConfig;
use crate::dispatcher::{
    Dispatcher, EventKind, NodeEvent, NodeEventPayload, ShimEvent, TaskEvent, TaskEventPayload,
};
use crate::events::{self, EventRecord, RecordKind};
use crate::metadata::{self, ApplicationMetadata};
use crate::namespace;
use crate::orchestrator::Orchestrator;
use crate::recorder::{EventObjectRef, EventRecorder, ReferenceKind};
use crate::task::{Task, TaskEnv, TaskState};
use crate::volume::VolumeBinder;

/// Errors surfaced by context operations.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("application {0} is not found in the context")]
    ApplicationNotFound(String),

    #[error("application {application_id} because it still has task in non-terminated task, tasks: {task_aliases}")]
    ApplicationNotTerminated {
        application_id: String,
        task_aliases: String,
    },

    #[error("pod {pod_name} has conflicting volume claims: {reasons}")]
    VolumeConflict { pod_name: String, reasons: String },

    /// Volume binder error, surfaced verbatim.
    #[error("{0}")]
    VolumeBinding(String),
}

#[derive(Debug, Clone)]
pub struct AddApplicationRequest {
    pub metadata: ApplicationMetadata,
}

#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub application_id: String,
    pub task_id: String,
    pub pod: Pod,
}

#[derive(Debug, Clone)]
pub struct AddTaskRequest {
    pub metadata: TaskMetadata,
}

/// A pod deletion: either the final object or a tombstone.
#[derive(Debug, Clone)]
pub enum PodDeletion {
    Pod(Pod),
    Tombstone(Tombstone<Pod>),
}

impl PodDeletion {
    fn resolve(self) -> Option<Pod> {
        match self {
            PodDeletion::Pod(pod) => Some(pod),
            PodDeletion::Tombstone(tombstone) => tombstone.object,
        }
    }
}

/// A node deletion: either the final object or a tombstone.
#[derive(Debug, Clone)]
pub enum NodeDeletion {
    Node(Node),
    Tombstone(Tombstone<Node>),
}

impl NodeDeletion {
    fn resolve(self) -> Option<Node> {
        match self {
            NodeDeletion::Node(node) => Some(node),
            NodeDeletion::Tombstone(tombstone) => tombstone.object,
        }
    }
}

/// External collaborators handed to the context at construction.
pub struct Dependencies {
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler_api: Arc<dyn SchedulerApi>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub volume_binder: Arc<dyn VolumeBinder>,
    pub recorder: Arc<dyn EventRecorder>,
}

struct ContextInner {
    applications: HashMap<String, Arc<Application>>,
    pending_allocations: HashMap<String, String>,
    in_progress_allocations: HashMap<String, String>,
}

pub struct Context {
    config: ShimConfig,
    cache: SchedulerCache,
    dispatcher: Arc<Dispatcher>,
    scheduler_api: Arc<dyn SchedulerApi>,
    orchestrator: Arc<dyn Orchestrator>,
    volume_binder: Arc<dyn VolumeBinder>,
    recorder: Arc<dyn EventRecorder>,
    inner: RwLock<ContextInner>,
}

impl Context {
    pub fn new(config: ShimConfig, deps: Dependencies) -> Arc<Self> {
        let cache = SchedulerCache::new(&config.scheduler_name);
        Arc::new(Self {
            config,
            cache,
            dispatcher: deps.dispatcher,
            scheduler_api: deps.scheduler_api,
            orchestrator: deps.orchestrator,
            volume_binder: deps.volume_binder,
            recorder: deps.recorder,
            inner: RwLock::new(ContextInner {
                applications: HashMap::new(),
                pending_allocations: HashMap::new(),
                in_progress_allocations: HashMap::new(),
            }),
        })
    }

    pub fn cache(&self) -> &SchedulerCache {
        &self.cache
    }

    fn task_env(&self) -> TaskEnv {
        TaskEnv {
            dispatcher: Arc::clone(&self.dispatcher),
            orchestrator: Arc::clone(&self.orchestrator),
            recorder: Arc::clone(&self.recorder),
        }
    }

    /// Wire the context's handlers into the dispatcher.
    pub async fn register_event_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let app_weak = weak.clone();
        self.dispatcher
            .register_event_handler(
                "context-application",
                EventKind::Application,
                Arc::new(move |event| {
                    let weak = app_weak.clone();
                    Box::pin(async move {
                        let Some(context) = weak.upgrade() else {
                            return;
                        };
                        let ShimEvent::Application(payload) = event else {
                            return;
                        };
                        match context.get_application(&payload.application_id).await {
                            Some(app) => app.handle_event(payload.event).await,
                            None => warn!(
                                application_id = %payload.application_id,
                                "Event for unknown application"
                            ),
                        }
                    })
                }),
            )
            .await;

        let task_weak = weak.clone();
        self.dispatcher
            .register_event_handler(
                "context-task",
                EventKind::Task,
                Arc::new(move |event| {
                    let weak = task_weak.clone();
                    Box::pin(async move {
                        let Some(context) = weak.upgrade() else {
                            return;
                        };
                        let ShimEvent::Task(payload) = event else {
                            return;
                        };
                        match context
                            .get_task(&payload.application_id, &payload.task_id)
                            .await
                        {
                            Some(task) => task.handle(payload.event, &context.task_env()).await,
                            None => warn!(
                                application_id = %payload.application_id,
                                task_id = %payload.task_id,
                                "Event for unknown task"
                            ),
                        }
                    })
                }),
            )
            .await;

        self.dispatcher
            .register_event_handler(
                "context-node",
                EventKind::Node,
                Arc::new(move |event| {
                    let weak = weak.clone();
                    Box::pin(async move {
                        let Some(context) = weak.upgrade() else {
                            return;
                        };
                        if let ShimEvent::Node(payload) = event {
                            context.handle_node_event(payload).await;
                        }
                    })
                }),
            )
            .await;
    }

    // -------------------------------------------------------------------
    // Node handlers
    // -------------------------------------------------------------------

    /// A new node reported by the informer. Registered with the core in
    /// drained state; it becomes schedulable once accepted.
    pub async fn add_node(&self, node: &Node) {
        let capacity = self.parse_capacity(node);
        self.cache.add_node(node, capacity.clone()).await;
        info!(node_id = node.name(), capacity = %capacity, "Node added");
        self.send_node_request(node.name(), NodeAction::CreateDrain)
            .await;
    }

    /// Capacity change. An unknown node id is treated as an add.
    pub async fn update_node(&self, _old: Option<&Node>, node: &Node) {
        if self.cache.get_node(node.name()).await.is_none() {
            debug!(node_id = node.name(), "Update for unknown node, adding");
            self.add_node(node).await;
            return;
        }
        let capacity = self.parse_capacity(node);
        self.cache.update_node(node, capacity).await;
        self.send_node_request(node.name(), NodeAction::Update).await;
    }

    pub async fn delete_node(&self, deletion: NodeDeletion) {
        let Some(node) = deletion.resolve() else {
            debug!("Unresolvable node tombstone, ignoring");
            return;
        };
        let snapshot = self.cache.snapshot_resources(node.name()).await;
        if self.cache.remove_node(node.name()).await.is_none() {
            debug!(node_id = node.name(), "Delete for unknown node");
            return;
        }
        info!(node_id = node.name(), "Node removed");
        let (capacity, occupied) = snapshot.unwrap_or_default();
        let request = UpdateNodeRequest {
            nodes: vec![NodeInfo {
                node_id: node.name().to_string(),
                action: NodeAction::Decommission,
                schedulable_resource: capacity,
                occupied_resource: occupied,
            }],
        };
        if let Err(e) = self.scheduler_api.update_node(request).await {
            warn!(node_id = node.name(), error = %e, "Node decommission failed, transport will retry");
        }
    }

    async fn handle_node_event(&self, payload: NodeEventPayload) {
        match payload.event {
            NodeEvent::Accepted => {
                if !self
                    .cache
                    .set_node_lifecycle(&payload.node_id, NodeLifecycle::Accepted)
                    .await
                {
                    warn!(node_id = %payload.node_id, "Acceptance for unknown node");
                    return;
                }
                info!(node_id = %payload.node_id, "Node accepted by the scheduling core");
                self.send_node_request(&payload.node_id, NodeAction::DrainToSchedulable)
                    .await;
                self.recorder.publish(
                    &EventObjectRef {
                        kind: ReferenceKind::Node,
                        id: payload.node_id.clone(),
                    },
                    "NodeAccepted",
                    &format!("node {} is accepted by the scheduler", payload.node_id),
                );
            }
        }
    }

    fn parse_capacity(&self, node: &Node) -> Resource {
        match Resource::from_resource_list(&node.allocatable) {
            Ok(capacity) => capacity,
            Err(e) => {
                warn!(node_id = node.name(), error = %e, "Unparseable node capacity");
                Resource::new()
            }
        }
    }

    async fn send_node_request(&self, node_id: &str, action: NodeAction) {
        let Some((capacity, occupied)) = self.cache.snapshot_resources(node_id).await else {
            return;
        };
        let request = UpdateNodeRequest {
            nodes: vec![NodeInfo {
                node_id: node_id.to_string(),
                action,
                schedulable_resource: capacity,
                occupied_resource: occupied,
            }],
        };
        if let Err(e) = self.scheduler_api.update_node(request).await {
            warn!(node_id, ?action, error = %e, "Node request failed, transport will retry");
        }
    }

    // -------------------------------------------------------------------
    // Pod handlers
    // -------------------------------------------------------------------

    pub async fn add_pod(&self, pod: &Pod) {
        if metadata::is_managed_pod(pod, &self.config.scheduler_name) {
            self.upsert_managed_pod(pod).await;
        } else {
            self.upsert_foreign_pod(pod).await;
        }
    }

    pub async fn update_pod(&self, _old: Option<&Pod>, pod: &Pod) {
        if metadata::is_managed_pod(pod, &self.config.scheduler_name) {
            self.upsert_managed_pod(pod).await;
        } else {
            self.upsert_foreign_pod(pod).await;
        }
    }

    pub async fn delete_pod(&self, deletion: PodDeletion) {
        let Some(pod) = deletion.resolve() else {
            debug!("Unresolvable pod tombstone, ignoring");
            return;
        };
        if metadata::is_managed_pod(&pod, &self.config.scheduler_name) {
            self.cache.remove_pod(pod.uid()).await;
            debug!(pod = %pod.alias(), "Managed pod removed");
        } else {
            if let Some(node_id) = self.cache.foreign_tracking_node(pod.uid()).await {
                self.untrack_foreign_pod(&node_id, &pod).await;
            }
            self.cache.remove_pod(pod.uid()).await;
        }
    }

    async fn upsert_managed_pod(&self, pod: &Pod) {
        if pod.status.phase.is_terminal() {
            debug!(pod = %pod.alias(), phase = ?pod.status.phase, "Managed pod terminal, removing");
            self.cache.remove_pod(pod.uid()).await;
        } else {
            self.cache.add_pod(pod).await;
        }
    }

    /// Foreign occupancy protocol. All transitions are idempotent: the
    /// cache coalesces double-adds and ignores double-removes, and RPCs
    /// go out only for changes that actually applied.
    async fn upsert_foreign_pod(&self, pod: &Pod) {
        let tracked_node = self.cache.foreign_tracking_node(pod.uid()).await;
        let terminal = pod.status.phase.is_terminal();

        if terminal || !pod.is_assigned() {
            if let Some(node_id) = tracked_node {
                self.untrack_foreign_pod(&node_id, pod).await;
            }
            if terminal {
                self.cache.remove_pod(pod.uid()).await;
            }
            return;
        }

        let node_id = pod.node_name().unwrap_or_default().to_string();
        match tracked_node {
            Some(tracked) if tracked == node_id => {
                // Already accounted for; just refresh the cached object.
                self.cache.update_pod(pod).await;
            }
            Some(tracked) => {
                // Pod moved between nodes: re-home its contribution.
                self.untrack_foreign_pod(&tracked, pod).await;
                self.track_foreign_pod(&node_id, pod).await;
            }
            None => self.track_foreign_pod(&node_id, pod).await,
        }
    }

    async fn track_foreign_pod(&self, node_id: &str, pod: &Pod) {
        let delta = match pod.requests() {
            Ok(requests) => requests,
            Err(e) => {
                warn!(pod = %pod.alias(), error = %e, "Unparseable foreign pod requests");
                return;
            }
        };
        let Some(update) = self
            .cache
            .update_occupied_resource(node_id, pod.uid(), &pod.alias(), &delta, OccupiedOp::Add)
            .await
        else {
            warn!(pod = %pod.alias(), node_id, "Foreign pod on unknown node");
            return;
        };
        self.cache.add_pod(pod).await;
        if update.applied {
            debug!(pod = %pod.alias(), node_id, occupied = %update.occupied, "Foreign pod tracked");
            self.send_occupied_update(node_id, &update).await;
        }
    }

    async fn untrack_foreign_pod(&self, node_id: &str, pod: &Pod) {
        let Some(update) = self
            .cache
            .update_occupied_resource(
                node_id,
                pod.uid(),
                &pod.alias(),
                &Resource::new(),
                OccupiedOp::Sub,
            )
            .await
        else {
            return;
        };
        if update.applied {
            debug!(pod = %pod.alias(), node_id, occupied = %update.occupied, "Foreign pod untracked");
            self.send_occupied_update(node_id, &update).await;
        }
    }

    async fn send_occupied_update(&self, node_id: &str, update: &OccupiedUpdate) {
        let request = UpdateNodeRequest {
            nodes: vec![NodeInfo {
                node_id: node_id.to_string(),
                action: NodeAction::Update,
                schedulable_resource: update.capacity.clone(),
                occupied_resource: update.occupied.clone(),
            }],
        };
        if let Err(e) = self.scheduler_api.update_node(request).await {
            warn!(node_id, error = %e, "Occupied update failed, transport will retry");
        }
    }

    // -------------------------------------------------------------------
    // Applications and tasks
    // -------------------------------------------------------------------

    /// Create and register an application. A duplicate id returns the
    /// existing application untouched; queue and user are never
    /// overwritten.
    pub async fn add_application(&self, request: AddApplicationRequest) -> Arc<Application> {
        let mut metadata = request.metadata;
        if let Some(existing) = self.get_application(&metadata.application_id).await {
            debug!(
                application_id = %metadata.application_id,
                "Application already exists, returning existing"
            );
            return existing;
        }

        namespace::enrich_from_namespace(self.orchestrator.as_ref(), &mut metadata).await;

        let app = Arc::new(Application::new(
            &metadata.application_id,
            &metadata.queue_name,
            &metadata.user,
            metadata.groups.clone(),
            metadata.tags.clone(),
            Arc::clone(&self.scheduler_api),
        ));
        {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.applications.get(&metadata.application_id) {
                return Arc::clone(existing);
            }
            inner
                .applications
                .insert(metadata.application_id.clone(), Arc::clone(&app));
        }
        info!(
            application_id = %metadata.application_id,
            queue = %metadata.queue_name,
            "Application added"
        );

        let registration = ApplicationRegistration {
            application_id: metadata.application_id.clone(),
            queue: metadata.queue_name.clone(),
            user: metadata.user.clone(),
            groups: metadata.groups.clone(),
            tags: metadata.tags.clone(),
        };
        if let Err(e) = self
            .scheduler_api
            .update_application(UpdateApplicationRequest {
                new: vec![registration],
                remove: Vec::new(),
            })
            .await
        {
            warn!(
                application_id = %metadata.application_id,
                error = %e,
                "Application registration failed, transport will retry"
            );
        }
        app
    }

    pub async fn get_application(&self, application_id: &str) -> Option<Arc<Application>> {
        self.inner
            .read()
            .await
            .applications
            .get(application_id)
            .cloned()
    }

    pub async fn application_count(&self) -> usize {
        self.inner.read().await.applications.len()
    }

    /// Remove an application, refusing while it still owns live tasks.
    pub async fn remove_application(&self, application_id: &str) -> Result<(), ContextError> {
        let Some(app) = self.get_application(application_id).await else {
            return Err(ContextError::ApplicationNotFound(application_id.to_string()));
        };
        let aliases = app.non_terminated_task_aliases().await;
        if !aliases.is_empty() {
            return Err(ContextError::ApplicationNotTerminated {
                application_id: application_id.to_string(),
                task_aliases: aliases.join(", "),
            });
        }

        self.inner.write().await.applications.remove(application_id);
        info!(application_id, "Application removed");
        if let Err(e) = self
            .scheduler_api
            .update_application(UpdateApplicationRequest {
                new: Vec::new(),
                remove: vec![application_id.to_string()],
            })
            .await
        {
            warn!(application_id, error = %e, "Application removal RPC failed, transport will retry");
        }
        Ok(())
    }

    /// Unconditional removal, skipping the live-task check.
    pub async fn remove_application_internal(&self, application_id: &str) {
        if self
            .inner
            .write()
            .await
            .applications
            .remove(application_id)
            .is_some()
        {
            debug!(application_id, "Application removed (internal)");
        }
    }

    /// Attach a task to its application, fast-forwarding state when the
    /// pod was bound before the shim started. Returns `None` when the
    /// application is unknown.
    pub async fn add_task(&self, request: AddTaskRequest) -> Option<Arc<Task>> {
        let meta = request.metadata;
        let Some(app) = self.get_application(&meta.application_id).await else {
            warn!(
                application_id = %meta.application_id,
                task_id = %meta.task_id,
                "Task for unknown application"
            );
            return None;
        };
        if let Some(existing) = app.get_task(&meta.task_id).await {
            return Some(existing);
        }

        let task = Arc::new(Task::new(&meta.task_id, &meta.application_id, meta.pod.clone()));
        if let Some(allocation) = metadata::existing_allocation(&meta.pod) {
            // Existing placement: keep the allocation and never re-request
            // a node from the core.
            task.record_existing_allocation(&allocation.allocation_key, &allocation.node_id)
                .await;
        }
        if meta.pod.is_assigned() && meta.pod.status.phase.is_terminal() {
            task.set_state(TaskState::Completed).await;
        }
        let task = app.add_task(task).await;
        let state = task.state().await;
        debug!(
            application_id = %meta.application_id,
            task_id = %meta.task_id,
            state = state.as_str(),
            "Task added"
        );
        Some(task)
    }

    /// Silent on a missing application or task.
    pub async fn remove_task(&self, application_id: &str, task_id: &str) {
        if let Some(app) = self.get_application(application_id).await {
            app.remove_task(task_id).await;
        }
    }

    pub async fn get_task(&self, application_id: &str, task_id: &str) -> Option<Arc<Task>> {
        match self.get_application(application_id).await {
            Some(app) => app.get_task(task_id).await,
            None => None,
        }
    }

    /// Run one schedule tick for an application.
    pub async fn schedule_application(&self, application_id: &str) {
        if let Some(app) = self.get_application(application_id).await {
            app.schedule(&self.task_env()).await;
        }
    }

    /// Mark a task complete through the dispatcher.
    pub async fn notify_task_complete(&self, application_id: &str, task_id: &str) {
        self.dispatcher
            .dispatch(ShimEvent::Task(TaskEventPayload {
                application_id: application_id.to_string(),
                task_id: task_id.to_string(),
                event: TaskEvent::Complete,
            }))
            .await;
    }

    /// Update a task's pod-condition watermark. Only meaningful while
    /// the task is being scheduled.
    pub async fn update_pod_condition(&self, task: &Task, condition: &PodCondition) -> bool {
        if task.state().await != TaskState::Scheduling {
            return false;
        }
        task.maybe_update_pod_condition(condition).await
    }

    // -------------------------------------------------------------------
    // Volume-binding handshake
    // -------------------------------------------------------------------

    /// Assume a pod onto a node after checking its volume claims. On any
    /// binder error the cache is left untouched.
    pub async fn assume_pod(&self, pod_uid: &str, node_id: &str) -> Result<(), ContextError> {
        let Some(pod) = self.cache.get_pod(pod_uid).await else {
            debug!(pod_uid, "Assume for unknown pod, nothing to do");
            return Ok(());
        };

        let claims = self
            .volume_binder
            .get_pod_volume_claims(&pod)
            .await
            .map_err(|e| ContextError::VolumeBinding(e.to_string()))?;

        let found = self
            .volume_binder
            .find_pod_volumes(&pod, &claims, node_id)
            .await
            .map_err(|e| ContextError::VolumeBinding(e.to_string()))?;
        if !found.conflict_reasons.is_empty() {
            return Err(ContextError::VolumeConflict {
                pod_name: pod.name().to_string(),
                reasons: found.conflict_reasons.join(", "),
            });
        }

        let all_bound = self
            .volume_binder
            .assume_pod_volumes(&pod, node_id, &found.volumes)
            .await
            .map_err(|e| ContextError::VolumeBinding(e.to_string()))?;

        self.cache.assume_pod(pod_uid, node_id, all_bound).await;
        debug!(pod_uid, node_id, all_bound, "Pod assumed");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Allocation bookkeeping
    // -------------------------------------------------------------------

    /// Record a placement decision from the core, before binding starts.
    pub async fn add_pending_pod_allocation(&self, pod_uid: &str, node_id: &str) {
        let mut inner = self.inner.write().await;
        inner.in_progress_allocations.remove(pod_uid);
        inner
            .pending_allocations
            .insert(pod_uid.to_string(), node_id.to_string());
    }

    pub async fn get_pending_pod_allocation(&self, pod_uid: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .pending_allocations
            .get(pod_uid)
            .cloned()
    }

    pub async fn get_in_progress_pod_allocation(&self, pod_uid: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .in_progress_allocations
            .get(pod_uid)
            .cloned()
    }

    /// Move a pending allocation to in-progress, but only when the caller
    /// names the node the core chose. Returns false and changes nothing
    /// on a mismatch.
    pub async fn start_pod_allocation(&self, pod_uid: &str, node_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.pending_allocations.get(pod_uid) {
            Some(pending) if pending == node_id => {
                inner.pending_allocations.remove(pod_uid);
                inner
                    .in_progress_allocations
                    .insert(pod_uid.to_string(), node_id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Drop the allocation record from whichever map holds it.
    pub async fn remove_pod_allocation(&self, pod_uid: &str) {
        let mut inner = self.inner.write().await;
        inner.pending_allocations.remove(pod_uid);
        inner.in_progress_allocations.remove(pod_uid);
    }

    // -------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------

    /// Load the full cluster view: priority classes, then nodes with
    /// their foreign occupancy, then pods. Must not run concurrently
    /// with informer traffic.
    pub async fn initialize_state(&self) -> anyhow::Result<()> {
        info!("Loading initial cluster state");

        let priority_classes = self.orchestrator.list_priority_classes().await?;
        for pc in &priority_classes {
            self.cache.add_priority_class(pc).await;
        }

        let pods = self.orchestrator.list_pods().await?;
        let nodes = self.orchestrator.list_nodes().await?;

        let mut registrations = Vec::new();
        for node in &nodes {
            let capacity = self.parse_capacity(node);
            self.cache.add_node(node, capacity).await;

            // Seed foreign occupancy from pods already on the node.
            for pod in &pods {
                if metadata::is_managed_pod(pod, &self.config.scheduler_name)
                    || pod.status.phase.is_terminal()
                    || pod.node_name() != Some(node.name())
                {
                    continue;
                }
                let delta = match pod.requests() {
                    Ok(requests) => requests,
                    Err(e) => {
                        warn!(pod = %pod.alias(), error = %e, "Unparseable foreign pod requests");
                        continue;
                    }
                };
                self.cache
                    .update_occupied_resource(
                        node.name(),
                        pod.uid(),
                        &pod.alias(),
                        &delta,
                        OccupiedOp::Add,
                    )
                    .await;
            }

            let (capacity, occupied) = self
                .cache
                .snapshot_resources(node.name())
                .await
                .unwrap_or_default();
            registrations.push(NodeInfo {
                node_id: node.name().to_string(),
                action: NodeAction::Register,
                schedulable_resource: capacity,
                occupied_resource: occupied,
            });
        }
        if !registrations.is_empty() {
            self.scheduler_api
                .update_node(UpdateNodeRequest {
                    nodes: registrations,
                })
                .await?;
        }

        let mut recovered_tasks = 0;
        let mut orphans = 0;
        for pod in &pods {
            if !metadata::is_managed_pod(pod, &self.config.scheduler_name) {
                self.upsert_foreign_pod(pod).await;
                continue;
            }
            if !pod.status.phase.is_terminal() {
                self.cache.add_pod(pod).await;
            }

            // Orphans are cached for visibility but get no task: their
            // node may still appear later.
            if self.cache.is_pod_orphaned(pod.uid()).await {
                warn!(pod = %pod.alias(), node = ?pod.node_name(), "Managed pod on unknown node");
                orphans += 1;
                continue;
            }

            let Some(app_metadata) = metadata::application_metadata(pod) else {
                debug!(pod = %pod.alias(), "Managed pod without application id, no task");
                continue;
            };
            let application_id = app_metadata.application_id.clone();
            self.add_application(AddApplicationRequest {
                metadata: app_metadata,
            })
            .await;
            self.add_task(AddTaskRequest {
                metadata: TaskMetadata {
                    application_id,
                    task_id: pod.uid().to_string(),
                    pod: pod.clone(),
                },
            })
            .await;
            recovered_tasks += 1;
        }

        info!(
            priority_classes = priority_classes.len(),
            nodes = nodes.len(),
            pods = pods.len(),
            recovered_tasks,
            orphans,
            "Initial cluster state loaded"
        );
        Ok(())
    }

    // -------------------------------------------------------------------
    // Event publishing
    // -------------------------------------------------------------------

    /// Publish scheduling-core event records as orchestrator events,
    /// dropping suppressed kinds and records whose object cannot be
    /// resolved against the cache.
    pub async fn publish_events(&self, records: Vec<EventRecord>) {
        for record in records {
            if events::is_filtered(&record) {
                debug!(object_id = %record.object_id, "Suppressed event record");
                continue;
            }
            let reason = if record.reason.is_empty() {
                "Scheduling"
            } else {
                record.reason.as_str()
            };
            match record.kind {
                RecordKind::Node => {
                    if self.cache.get_node(&record.object_id).await.is_none() {
                        debug!(node_id = %record.object_id, "Event for unknown node, dropped");
                        continue;
                    }
                    self.recorder.publish(
                        &EventObjectRef {
                            kind: ReferenceKind::Node,
                            id: record.object_id.clone(),
                        },
                        reason,
                        &record.message,
                    );
                }
                RecordKind::Task => {
                    let Some(task) = self
                        .get_task(&record.reference_id, &record.object_id)
                        .await
                    else {
                        debug!(task_id = %record.object_id, "Event for unknown task, dropped");
                        continue;
                    };
                    self.recorder.publish(
                        &EventObjectRef {
                            kind: ReferenceKind::Pod,
                            id: task.task_id().to_string(),
                        },
                        reason,
                        &record.message,
                    );
                }
                RecordKind::Application => {
                    if self.get_application(&record.object_id).await.is_none() {
                        debug!(application_id = %record.object_id, "Event for unknown application, dropped");
                        continue;
                    }
                    self.recorder.publish(
                        &EventObjectRef {
                            kind: ReferenceKind::Application,
                            id: record.object_id.clone(),
                        },
                        reason,
                        &record.message,
                    );
                }
                // Queue records never pass the filter.
                RecordKind::Queue => {}
            }
        }
    }

    // -------------------------------------------------------------------
    // State dump
    // -------------------------------------------------------------------

    /// JSON snapshot served by the state-dump endpoint.
    pub async fn get_state_dump(&self) -> anyhow::Result<String> {
        let dump = serde_json::json!({ "cache": self.cache.dump().await });
        Ok(serde_json::to_string(&dump)?)
    }
}
