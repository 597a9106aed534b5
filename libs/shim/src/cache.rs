//! Authoritative in-memory view of cluster objects relevant to
//! scheduling: nodes, pods, priority classes, assumed pods, and per-node
//! foreign occupancy.
//!
//! All state sits behind one `RwLock`; read paths take the shared lock
//! and every accessor returns clones, never references into the map.
//! Foreign occupancy is keyed by pod uid per node, which makes double-add
//! and double-remove structurally idempotent.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use gantry_model::{Node, Pod, PriorityClass, Resource};

use crate::metadata;

/// Lifecycle of a node as seen by the shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    /// Registered with the scheduling core, acceptance pending.
    PendingAccept,
    /// Accepted and schedulable.
    Accepted,
    /// Being drained.
    Draining,
    /// Removed from the cluster.
    Removed,
}

/// Direction of an occupied-resource change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupiedOp {
    Add,
    Sub,
}

/// Outcome of an occupied-resource update. `applied` is false when the
/// change collapsed into a no-op (double-add or double-remove).
#[derive(Debug, Clone)]
pub struct OccupiedUpdate {
    pub previous_occupied: Resource,
    pub occupied: Resource,
    pub capacity: Resource,
    pub applied: bool,
}

struct CachedNode {
    node: Node,
    capacity: Resource,
    occupied: Resource,
    foreign: HashMap<String, Resource>,
    lifecycle: NodeLifecycle,
}

struct CachedPod {
    pod: Pod,
    assumed: bool,
    all_volumes_bound: bool,
}

#[derive(Default)]
struct CacheInner {
    nodes: HashMap<String, CachedNode>,
    pods: HashMap<String, CachedPod>,
    priority_classes: HashMap<String, PriorityClass>,
}

pub struct SchedulerCache {
    scheduler_name: String,
    inner: RwLock<CacheInner>,
}

impl SchedulerCache {
    pub fn new(scheduler_name: &str) -> Self {
        Self {
            scheduler_name: scheduler_name.to_string(),
            inner: RwLock::new(CacheInner::default()),
        }
    }

    // -------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------

    /// Insert a node. An existing entry keeps its occupancy and
    /// lifecycle; only the object and capacity are replaced.
    pub async fn add_node(&self, node: &Node, capacity: Resource) {
        let mut inner = self.inner.write().await;
        match inner.nodes.get_mut(node.name()) {
            Some(cached) => {
                cached.node = node.clone();
                cached.capacity = capacity;
            }
            None => {
                inner.nodes.insert(
                    node.name().to_string(),
                    CachedNode {
                        node: node.clone(),
                        capacity,
                        occupied: Resource::new(),
                        foreign: HashMap::new(),
                        lifecycle: NodeLifecycle::PendingAccept,
                    },
                );
            }
        }
    }

    /// Replace a node's schedulable capacity, preserving occupancy.
    pub async fn update_node(&self, node: &Node, capacity: Resource) {
        self.add_node(node, capacity).await;
    }

    pub async fn remove_node(&self, node_id: &str) -> Option<Node> {
        let mut inner = self.inner.write().await;
        inner.nodes.remove(node_id).map(|cached| cached.node)
    }

    pub async fn get_node(&self, node_id: &str) -> Option<Node> {
        let inner = self.inner.read().await;
        inner.nodes.get(node_id).map(|cached| cached.node.clone())
    }

    pub async fn node_lifecycle(&self, node_id: &str) -> Option<NodeLifecycle> {
        let inner = self.inner.read().await;
        inner.nodes.get(node_id).map(|cached| cached.lifecycle)
    }

    pub async fn set_node_lifecycle(&self, node_id: &str, lifecycle: NodeLifecycle) -> bool {
        let mut inner = self.inner.write().await;
        match inner.nodes.get_mut(node_id) {
            Some(cached) => {
                cached.lifecycle = lifecycle;
                true
            }
            None => false,
        }
    }

    /// Capacity and occupied vectors for a node.
    pub async fn snapshot_resources(&self, node_id: &str) -> Option<(Resource, Resource)> {
        let inner = self.inner.read().await;
        inner
            .nodes
            .get(node_id)
            .map(|cached| (cached.capacity.clone(), cached.occupied.clone()))
    }

    /// Apply a foreign pod's contribution to a node's occupied vector.
    ///
    /// Keyed by `(node_id, pod_uid)`: adding an already-tracked pod or
    /// removing an untracked one changes nothing and reports
    /// `applied: false`. `Sub` releases the contribution recorded at add
    /// time; `delta` is only read on `Add`. Returns `None` when the node
    /// is unknown.
    pub async fn update_occupied_resource(
        &self,
        node_id: &str,
        pod_uid: &str,
        alias: &str,
        delta: &Resource,
        op: OccupiedOp,
    ) -> Option<OccupiedUpdate> {
        let mut inner = self.inner.write().await;
        let Some(cached) = inner.nodes.get_mut(node_id) else {
            warn!(node_id, pod = alias, "Occupied update for unknown node");
            return None;
        };

        let previous_occupied = cached.occupied.clone();
        let applied = match op {
            OccupiedOp::Add => {
                if cached.foreign.contains_key(pod_uid) {
                    debug!(node_id, pod = alias, "Pod already tracked, coalescing add");
                    false
                } else {
                    cached.foreign.insert(pod_uid.to_string(), delta.clone());
                    cached.occupied.add(delta);
                    true
                }
            }
            OccupiedOp::Sub => match cached.foreign.remove(pod_uid) {
                Some(contribution) => {
                    cached.occupied.sub(&contribution);
                    true
                }
                None => {
                    debug!(node_id, pod = alias, "Pod not tracked, ignoring remove");
                    false
                }
            },
        };

        Some(OccupiedUpdate {
            previous_occupied,
            occupied: cached.occupied.clone(),
            capacity: cached.capacity.clone(),
            applied,
        })
    }

    /// Node a foreign pod currently contributes to, if any.
    pub async fn foreign_tracking_node(&self, pod_uid: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .nodes
            .iter()
            .find(|(_, cached)| cached.foreign.contains_key(pod_uid))
            .map(|(node_id, _)| node_id.clone())
    }

    // -------------------------------------------------------------------
    // Pods
    // -------------------------------------------------------------------

    /// Insert or replace a pod. Assumed and volume flags survive a
    /// replace.
    pub async fn add_pod(&self, pod: &Pod) {
        let mut inner = self.inner.write().await;
        match inner.pods.get_mut(pod.uid()) {
            Some(cached) => cached.pod = pod.clone(),
            None => {
                inner.pods.insert(
                    pod.uid().to_string(),
                    CachedPod {
                        pod: pod.clone(),
                        assumed: false,
                        all_volumes_bound: false,
                    },
                );
            }
        }
    }

    pub async fn update_pod(&self, pod: &Pod) {
        self.add_pod(pod).await;
    }

    /// Remove a pod; its assumed and volume flags go with it.
    pub async fn remove_pod(&self, pod_uid: &str) {
        let mut inner = self.inner.write().await;
        inner.pods.remove(pod_uid);
    }

    pub async fn get_pod(&self, pod_uid: &str) -> Option<Pod> {
        let inner = self.inner.read().await;
        inner.pods.get(pod_uid).map(|cached| cached.pod.clone())
    }

    /// Mark a pod assumed on a node after the volume handshake.
    pub async fn assume_pod(&self, pod_uid: &str, node_id: &str, all_volumes_bound: bool) -> bool {
        let mut inner = self.inner.write().await;
        match inner.pods.get_mut(pod_uid) {
            Some(cached) => {
                cached.pod.spec.node_name = Some(node_id.to_string());
                cached.assumed = true;
                cached.all_volumes_bound = all_volumes_bound;
                true
            }
            None => false,
        }
    }

    pub async fn is_assumed_pod(&self, pod_uid: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .pods
            .get(pod_uid)
            .map(|cached| cached.assumed)
            .unwrap_or(false)
    }

    pub async fn are_pod_volumes_all_bound(&self, pod_uid: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .pods
            .get(pod_uid)
            .map(|cached| cached.all_volumes_bound)
            .unwrap_or(false)
    }

    /// A pod is orphaned when it is managed, carries a node name, and
    /// that node is absent from the cache.
    pub async fn is_pod_orphaned(&self, pod_uid: &str) -> bool {
        let inner = self.inner.read().await;
        let Some(cached) = inner.pods.get(pod_uid) else {
            return false;
        };
        if !metadata::is_managed_pod(&cached.pod, &self.scheduler_name) {
            return false;
        }
        match cached.pod.node_name() {
            Some(node) if !node.is_empty() => !inner.nodes.contains_key(node),
            _ => false,
        }
    }

    // -------------------------------------------------------------------
    // Priority classes
    // -------------------------------------------------------------------

    pub async fn add_priority_class(&self, pc: &PriorityClass) {
        let mut inner = self.inner.write().await;
        inner
            .priority_classes
            .insert(pc.meta.name.clone(), pc.clone());
    }

    pub async fn get_priority_class(&self, name: &str) -> Option<PriorityClass> {
        let inner = self.inner.read().await;
        inner.priority_classes.get(name).cloned()
    }

    pub async fn remove_priority_class(&self, name: &str) {
        let mut inner = self.inner.write().await;
        inner.priority_classes.remove(name);
    }

    // -------------------------------------------------------------------
    // State dump
    // -------------------------------------------------------------------

    /// JSON snapshot of the pod cache, keyed by `namespace/name`.
    pub async fn dump(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct PodDumpEntry {
            uid: String,
            assumed: bool,
            #[serde(rename = "allVolumesBound")]
            all_volumes_bound: bool,
            node: String,
        }

        let inner = self.inner.read().await;
        let pods: std::collections::BTreeMap<String, PodDumpEntry> = inner
            .pods
            .values()
            .map(|cached| {
                (
                    cached.pod.alias(),
                    PodDumpEntry {
                        uid: cached.pod.uid().to_string(),
                        assumed: cached.assumed,
                        all_volumes_bound: cached.all_volumes_bound,
                        node: cached.pod.node_name().unwrap_or_default().to_string(),
                    },
                )
            })
            .collect();

        serde_json::json!({ "pods": pods })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_model::{constants, ObjectMeta, PodSpec, MEMORY, VCORE};

    fn cache() -> SchedulerCache {
        SchedulerCache::new(constants::SCHEDULER_NAME)
    }

    fn node(name: &str) -> Node {
        Node {
            meta: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn managed_pod(uid: &str, node_name: &str) -> Pod {
        Pod {
            meta: ObjectMeta {
                name: format!("pod-{}", uid),
                namespace: "default".to_string(),
                uid: uid.to_string(),
                ..Default::default()
            },
            spec: PodSpec {
                scheduler_name: constants::SCHEDULER_NAME.to_string(),
                node_name: (!node_name.is_empty()).then(|| node_name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn capacity() -> Resource {
        Resource::new().with(MEMORY, 10_000_000_000).with(VCORE, 10_000)
    }

    fn contribution() -> Resource {
        Resource::new().with(MEMORY, 1_000_000_000).with(VCORE, 500)
    }

    #[tokio::test]
    async fn test_node_update_preserves_occupied() {
        let cache = cache();
        cache.add_node(&node("host1"), capacity()).await;
        cache
            .update_occupied_resource("host1", "uid-1", "default/p1", &contribution(), OccupiedOp::Add)
            .await
            .unwrap();

        let doubled = Resource::new()
            .with(MEMORY, 20_000_000_000)
            .with(VCORE, 20_000);
        cache.update_node(&node("host1"), doubled.clone()).await;

        let (cap, occupied) = cache.snapshot_resources("host1").await.unwrap();
        assert_eq!(cap, doubled);
        assert_eq!(occupied.get(MEMORY), 1_000_000_000);
        assert_eq!(occupied.get(VCORE), 500);
    }

    #[tokio::test]
    async fn test_occupied_double_add_coalesces() {
        let cache = cache();
        cache.add_node(&node("host1"), capacity()).await;

        let first = cache
            .update_occupied_resource("host1", "uid-1", "default/p1", &contribution(), OccupiedOp::Add)
            .await
            .unwrap();
        assert!(first.applied);
        assert_eq!(first.occupied.get(MEMORY), 1_000_000_000);

        let second = cache
            .update_occupied_resource("host1", "uid-1", "default/p1", &contribution(), OccupiedOp::Add)
            .await
            .unwrap();
        assert!(!second.applied);
        assert_eq!(second.occupied.get(MEMORY), 1_000_000_000);
    }

    #[tokio::test]
    async fn test_occupied_double_remove_is_noop() {
        let cache = cache();
        cache.add_node(&node("host1"), capacity()).await;
        cache
            .update_occupied_resource("host1", "uid-1", "default/p1", &contribution(), OccupiedOp::Add)
            .await
            .unwrap();

        let removed = cache
            .update_occupied_resource("host1", "uid-1", "default/p1", &contribution(), OccupiedOp::Sub)
            .await
            .unwrap();
        assert!(removed.applied);
        assert!(removed.occupied.is_zero());

        let again = cache
            .update_occupied_resource("host1", "uid-1", "default/p1", &contribution(), OccupiedOp::Sub)
            .await
            .unwrap();
        assert!(!again.applied);
        assert!(again.occupied.is_zero());
    }

    #[tokio::test]
    async fn test_occupied_unknown_node() {
        let cache = cache();
        let result = cache
            .update_occupied_resource("nope", "uid-1", "default/p1", &contribution(), OccupiedOp::Add)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_occupied_sum_matches_tracked_pods() {
        let cache = cache();
        cache.add_node(&node("host1"), capacity()).await;

        for uid in ["uid-1", "uid-2", "uid-3"] {
            cache
                .update_occupied_resource("host1", uid, "default/p", &contribution(), OccupiedOp::Add)
                .await
                .unwrap();
        }
        cache
            .update_occupied_resource("host1", "uid-2", "default/p", &contribution(), OccupiedOp::Sub)
            .await
            .unwrap();

        let (_, occupied) = cache.snapshot_resources("host1").await.unwrap();
        assert_eq!(occupied.get(MEMORY), 2_000_000_000);
        assert_eq!(occupied.get(VCORE), 1_000);
    }

    #[tokio::test]
    async fn test_pod_flags_cleared_on_remove() {
        let cache = cache();
        let pod = managed_pod("uid-1", "");
        cache.add_pod(&pod).await;
        assert!(cache.assume_pod("uid-1", "host1", true).await);
        assert!(cache.is_assumed_pod("uid-1").await);
        assert!(cache.are_pod_volumes_all_bound("uid-1").await);

        cache.remove_pod("uid-1").await;
        assert!(!cache.is_assumed_pod("uid-1").await);
        assert!(!cache.are_pod_volumes_all_bound("uid-1").await);

        // Re-adding starts from a clean slate.
        cache.add_pod(&pod).await;
        assert!(!cache.is_assumed_pod("uid-1").await);
    }

    #[tokio::test]
    async fn test_orphan_detection() {
        let cache = cache();
        cache.add_node(&node("host1"), capacity()).await;

        cache.add_pod(&managed_pod("on-known", "host1")).await;
        cache.add_pod(&managed_pod("on-unknown", "host2")).await;
        cache.add_pod(&managed_pod("unassigned", "")).await;

        assert!(!cache.is_pod_orphaned("on-known").await);
        assert!(cache.is_pod_orphaned("on-unknown").await);
        assert!(!cache.is_pod_orphaned("unassigned").await);
        assert!(!cache.is_pod_orphaned("missing").await);
    }

    #[tokio::test]
    async fn test_priority_class_crud() {
        let cache = cache();
        let mut pc = PriorityClass {
            meta: ObjectMeta {
                name: "high".to_string(),
                ..Default::default()
            },
            value: 100,
            ..Default::default()
        };
        cache.add_priority_class(&pc).await;
        let stored = cache.get_priority_class("high").await.unwrap();
        assert_eq!(stored.value, 100);

        pc.value = 200;
        cache.add_priority_class(&pc).await;
        assert_eq!(cache.get_priority_class("high").await.unwrap().value, 200);

        cache.remove_priority_class("high").await;
        assert!(cache.get_priority_class("high").await.is_none());
    }

    #[tokio::test]
    async fn test_dump_shape() {
        let cache = cache();
        cache.add_pod(&managed_pod("uid-1", "host1")).await;
        cache.assume_pod("uid-1", "host1", true).await;

        let dump = cache.dump().await;
        let entry = &dump["pods"]["default/pod-uid-1"];
        assert_eq!(entry["uid"], "uid-1");
        assert_eq!(entry["assumed"], true);
        assert_eq!(entry["allVolumesBound"], true);
        assert_eq!(entry["node"], "host1");
    }
}
