//! Outbound interface to the scheduling core.
//!
//! The transport (connection handling, retries) is out of scope; the shim
//! sees only this trait. Transient failures are retried by the transport
//! layer and never surface to callers, which is why handlers log and
//! continue on error instead of propagating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use gantry_model::Resource;

use crate::dispatcher::{
    Dispatcher, NodeEvent, NodeEventPayload, ShimEvent, TaskEvent, TaskEventPayload,
};

/// Node actions understood by the scheduling core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAction {
    /// Bulk registration during recovery.
    Register,
    /// Register a new node in drained state.
    CreateDrain,
    /// Flip an accepted node to schedulable.
    DrainToSchedulable,
    /// Capacity or occupancy change.
    Update,
    /// Node removed from the cluster.
    Decommission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub action: NodeAction,
    pub schedulable_resource: Resource,
    pub occupied_resource: Resource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    pub nodes: Vec<NodeInfo>,
}

/// One allocation ask. `node_id` is set when the placement already exists
/// (recovery) and empty when the core is free to choose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationAsk {
    pub application_id: String,
    pub allocation_key: String,
    pub node_id: Option<String>,
    pub resource: Resource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAllocationRequest {
    pub allocations: Vec<AllocationAsk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRegistration {
    pub application_id: String,
    pub queue: String,
    pub user: String,
    pub groups: Vec<String>,
    pub tags: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateApplicationRequest {
    pub new: Vec<ApplicationRegistration>,
    pub remove: Vec<String>,
}

/// RPC sink towards the scheduling core.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    async fn update_node(&self, request: UpdateNodeRequest) -> Result<()>;

    async fn update_allocation(&self, request: UpdateAllocationRequest) -> Result<()>;

    async fn update_application(&self, request: UpdateApplicationRequest) -> Result<()>;
}

/// Mock scheduling core for tests and development.
///
/// Records every request and can simulate the core's unsolicited
/// callbacks: accepting registered nodes and allocating asks onto their
/// requested nodes.
pub struct MockSchedulerApi {
    dispatcher: RwLock<Option<Arc<Dispatcher>>>,
    auto_accept_nodes: AtomicBool,
    auto_allocate: AtomicBool,
    fail_requests: AtomicBool,
    node_requests: Mutex<Vec<UpdateNodeRequest>>,
    allocation_requests: Mutex<Vec<UpdateAllocationRequest>>,
    application_requests: Mutex<Vec<UpdateApplicationRequest>>,
}

impl MockSchedulerApi {
    pub fn new() -> Self {
        Self {
            dispatcher: RwLock::new(None),
            auto_accept_nodes: AtomicBool::new(false),
            auto_allocate: AtomicBool::new(false),
            fail_requests: AtomicBool::new(false),
            node_requests: Mutex::new(Vec::new()),
            allocation_requests: Mutex::new(Vec::new()),
            application_requests: Mutex::new(Vec::new()),
        }
    }

    /// Attach the dispatcher used for simulated callbacks.
    pub fn attach_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        *self.dispatcher.write().unwrap() = Some(dispatcher);
    }

    /// Accept every node registered with `Register` or `CreateDrain`.
    pub fn set_auto_accept_nodes(&self, enabled: bool) {
        self.auto_accept_nodes.store(enabled, Ordering::SeqCst);
    }

    /// Immediately allocate every ask that names a node.
    pub fn set_auto_allocate(&self, enabled: bool) {
        self.auto_allocate.store(enabled, Ordering::SeqCst);
    }

    /// Fail every request.
    pub fn set_fail_requests(&self, enabled: bool) {
        self.fail_requests.store(enabled, Ordering::SeqCst);
    }

    pub fn node_requests(&self) -> Vec<UpdateNodeRequest> {
        self.node_requests.lock().unwrap().clone()
    }

    pub fn last_node_request(&self) -> Option<UpdateNodeRequest> {
        self.node_requests.lock().unwrap().last().cloned()
    }

    /// Node requests carrying the `Update` action, in order.
    pub fn node_update_requests(&self) -> Vec<UpdateNodeRequest> {
        self.node_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.nodes.iter().any(|n| n.action == NodeAction::Update))
            .cloned()
            .collect()
    }

    pub fn allocation_requests(&self) -> Vec<UpdateAllocationRequest> {
        self.allocation_requests.lock().unwrap().clone()
    }

    pub fn application_requests(&self) -> Vec<UpdateApplicationRequest> {
        self.application_requests.lock().unwrap().clone()
    }

    fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher.read().unwrap().clone()
    }
}

impl Default for MockSchedulerApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulerApi for MockSchedulerApi {
    async fn update_node(&self, request: UpdateNodeRequest) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            anyhow::bail!("mock scheduler configured to fail");
        }
        debug!(nodes = request.nodes.len(), "[MOCK] update_node");
        self.node_requests.lock().unwrap().push(request.clone());

        if self.auto_accept_nodes.load(Ordering::SeqCst) {
            if let Some(dispatcher) = self.dispatcher() {
                for node in &request.nodes {
                    if matches!(node.action, NodeAction::Register | NodeAction::CreateDrain) {
                        dispatcher
                            .dispatch(ShimEvent::Node(NodeEventPayload {
                                node_id: node.node_id.clone(),
                                event: NodeEvent::Accepted,
                            }))
                            .await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn update_allocation(&self, request: UpdateAllocationRequest) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            anyhow::bail!("mock scheduler configured to fail");
        }
        debug!(
            allocations = request.allocations.len(),
            "[MOCK] update_allocation"
        );
        self.allocation_requests
            .lock()
            .unwrap()
            .push(request.clone());

        if self.auto_allocate.load(Ordering::SeqCst) {
            if let Some(dispatcher) = self.dispatcher() {
                for ask in &request.allocations {
                    let Some(node_id) = ask.node_id.clone() else {
                        continue;
                    };
                    dispatcher
                        .dispatch(ShimEvent::Task(TaskEventPayload {
                            application_id: ask.application_id.clone(),
                            task_id: ask.allocation_key.clone(),
                            event: TaskEvent::Allocated {
                                node_id,
                                allocation_key: ask.allocation_key.clone(),
                            },
                        }))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn update_application(&self, request: UpdateApplicationRequest) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            anyhow::bail!("mock scheduler configured to fail");
        }
        debug!(
            new = request.new.len(),
            remove = request.remove.len(),
            "[MOCK] update_application"
        );
        self.application_requests.lock().unwrap().push(request);
        Ok(())
    }
}
