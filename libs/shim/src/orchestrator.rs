//! Read and bind surface towards the orchestrator.
//!
//! The informer framework, RBAC, and client plumbing live outside this
//! crate; recovery and binding go through this trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use gantry_model::{Namespace, Node, Pod, PriorityClass};

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// All nodes currently known to the orchestrator.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// All pods currently known to the orchestrator.
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    /// All priority classes.
    async fn list_priority_classes(&self) -> Result<Vec<PriorityClass>>;

    /// Look up a namespace by name.
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Bind a pod to a node.
    async fn bind_pod(&self, pod_uid: &str, node_id: &str) -> Result<()>;
}

/// In-memory orchestrator for tests and development.
pub struct MockOrchestrator {
    nodes: Mutex<Vec<Node>>,
    pods: Mutex<Vec<Pod>>,
    priority_classes: Mutex<Vec<PriorityClass>>,
    namespaces: Mutex<Vec<Namespace>>,
    bound: Mutex<Vec<(String, String)>>,
    fail_bind: AtomicBool,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            pods: Mutex::new(Vec::new()),
            priority_classes: Mutex::new(Vec::new()),
            namespaces: Mutex::new(Vec::new()),
            bound: Mutex::new(Vec::new()),
            fail_bind: AtomicBool::new(false),
        }
    }

    pub fn add_node(&self, node: Node) {
        self.nodes.lock().unwrap().push(node);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn add_priority_class(&self, pc: PriorityClass) {
        self.priority_classes.lock().unwrap().push(pc);
    }

    pub fn add_namespace(&self, namespace: Namespace) {
        self.namespaces.lock().unwrap().push(namespace);
    }

    pub fn set_fail_bind(&self, enabled: bool) {
        self.fail_bind.store(enabled, Ordering::SeqCst);
    }

    /// `(pod_uid, node_id)` pairs bound through this mock.
    pub fn bound_pods(&self) -> Vec<(String, String)> {
        self.bound.lock().unwrap().clone()
    }
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn list_priority_classes(&self) -> Result<Vec<PriorityClass>> {
        Ok(self.priority_classes.lock().unwrap().clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .find(|ns| ns.meta.name == name)
            .cloned())
    }

    async fn bind_pod(&self, pod_uid: &str, node_id: &str) -> Result<()> {
        if self.fail_bind.load(Ordering::SeqCst) {
            anyhow::bail!("mock orchestrator configured to fail binds");
        }
        debug!(pod_uid, node_id, "[MOCK] bind_pod");
        self.bound
            .lock()
            .unwrap()
            .push((pod_uid.to_string(), node_id.to_string()));
        Ok(())
    }
}
