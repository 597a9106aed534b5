//! Orchestrator object model.
//!
//! These mirror the subset of orchestrator API objects the shim consumes.
//! The informer layer (out of scope here) is responsible for producing
//! them; the shim treats them as plain data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::resource::{QuantityError, Resource};

/// Raw resource list as delivered by the orchestrator: dimension name to
/// quantity string, unparsed.
pub type ResourceList = BTreeMap<String, String>;

/// Common object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Pod lifecycle phase as reported by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Succeeded and Failed pods never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// A single pod status condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCondition {
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Node the pod is assigned to, if any.
    #[serde(default)]
    pub node_name: Option<String>,
    /// Scheduler responsible for this pod.
    #[serde(default)]
    pub scheduler_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn uid(&self) -> &str {
        &self.meta.uid
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    /// `namespace/name` alias used in logs and error messages.
    pub fn alias(&self) -> String {
        format!("{}/{}", self.meta.namespace, self.meta.name)
    }

    pub fn node_name(&self) -> Option<&str> {
        self.spec.node_name.as_deref()
    }

    pub fn is_assigned(&self) -> bool {
        self.spec.node_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Sum of container resource requests, normalized to scheduler
    /// dimensions.
    pub fn requests(&self) -> Result<Resource, QuantityError> {
        let mut total = Resource::new();
        for container in &self.spec.containers {
            total.add(&Resource::from_resource_list(&container.requests)?);
        }
        Ok(total)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub meta: ObjectMeta,
    /// Schedulable capacity as reported by the orchestrator, unparsed.
    #[serde(default)]
    pub allocatable: ResourceList,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

/// Preemption policy carried by a priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreemptionPolicy {
    #[default]
    PreemptLowerPriority,
    PreemptNever,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClass {
    pub meta: ObjectMeta,
    pub value: i32,
    #[serde(default)]
    pub global_default: bool,
    #[serde(default)]
    pub preemption_policy: PreemptionPolicy,
}

impl PriorityClass {
    /// Whether workloads in this class may be preempted. The annotation
    /// wins over the policy when present.
    pub fn allow_preemption(&self) -> bool {
        match self
            .meta
            .annotations
            .get(constants::ANNOTATION_ALLOW_PREEMPTION)
        {
            Some(value) => value == "true",
            None => self.preemption_policy != PreemptionPolicy::PreemptNever,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub meta: ObjectMeta,
}

/// Wrapper delivered by the informer when an object was deleted but its
/// final state was missed. `object` is the last known copy, if any.
#[derive(Debug, Clone)]
pub struct Tombstone<T> {
    pub key: String,
    pub object: Option<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantity_list(pairs: &[(&str, &str)]) -> ResourceList {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_pod_alias() {
        let pod = Pod {
            meta: ObjectMeta {
                name: "my-pod-1".to_string(),
                namespace: "batch".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pod.alias(), "batch/my-pod-1");
    }

    #[test]
    fn test_pod_requests_sum_containers() {
        let pod = Pod {
            spec: PodSpec {
                containers: vec![
                    Container {
                        name: "main".to_string(),
                        requests: quantity_list(&[("cpu", "500m"), ("memory", "1G")]),
                    },
                    Container {
                        name: "sidecar".to_string(),
                        requests: quantity_list(&[("cpu", "1"), ("memory", "256M")]),
                    },
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        let requests = pod.requests().unwrap();
        assert_eq!(requests.get(crate::resource::VCORE), 1_500);
        assert_eq!(requests.get(crate::resource::MEMORY), 1_256_000_000);
    }

    #[test]
    fn test_phase_terminal() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
    }

    #[test]
    fn test_allow_preemption_annotation_wins() {
        let mut pc = PriorityClass {
            value: 100,
            preemption_policy: PreemptionPolicy::PreemptLowerPriority,
            ..Default::default()
        };
        assert!(pc.allow_preemption());

        pc.meta.annotations.insert(
            constants::ANNOTATION_ALLOW_PREEMPTION.to_string(),
            "false".to_string(),
        );
        assert!(!pc.allow_preemption());

        pc.meta.annotations.clear();
        pc.preemption_policy = PreemptionPolicy::PreemptNever;
        assert!(!pc.allow_preemption());
    }
}
