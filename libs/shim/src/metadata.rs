//! Pod classification and application metadata extraction.

use std::collections::BTreeMap;

use gantry_model::{constants, Pod};

/// Metadata for creating an application, either from an explicit request
/// or derived from a managed pod during recovery.
#[derive(Debug, Clone, Default)]
pub struct ApplicationMetadata {
    pub application_id: String,
    pub queue_name: String,
    pub user: String,
    pub groups: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// Application id carried by a pod: annotation first, legacy label second.
pub fn application_id(pod: &Pod) -> Option<String> {
    pod.meta
        .annotations
        .get(constants::ANNOTATION_APP_ID)
        .or_else(|| pod.meta.labels.get(constants::LABEL_APP_ID))
        .filter(|id| !id.is_empty())
        .cloned()
}

/// A pod is managed when it names this scheduler or carries an
/// application id; everything else is foreign.
pub fn is_managed_pod(pod: &Pod, scheduler_name: &str) -> bool {
    pod.spec.scheduler_name == scheduler_name || application_id(pod).is_some()
}

/// Derive application metadata from a managed pod.
pub fn application_metadata(pod: &Pod) -> Option<ApplicationMetadata> {
    let application_id = application_id(pod)?;
    let queue_name = pod
        .meta
        .labels
        .get(constants::LABEL_QUEUE)
        .cloned()
        .unwrap_or_else(|| constants::DEFAULT_QUEUE.to_string());

    let mut tags = BTreeMap::new();
    if !pod.meta.namespace.is_empty() {
        tags.insert(
            constants::APP_TAG_NAMESPACE.to_string(),
            pod.meta.namespace.clone(),
        );
    }

    Some(ApplicationMetadata {
        application_id,
        queue_name,
        user: constants::DEFAULT_USER.to_string(),
        groups: Vec::new(),
        tags,
    })
}

/// An allocation that already exists in the cluster: a managed pod bound
/// to a node before the shim (re)started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingAllocation {
    pub application_id: String,
    pub allocation_key: String,
    pub node_id: String,
}

pub fn existing_allocation(pod: &Pod) -> Option<ExistingAllocation> {
    let application_id = application_id(pod)?;
    let node_id = pod.node_name().filter(|n| !n.is_empty())?;
    Some(ExistingAllocation {
        application_id,
        allocation_key: pod.uid().to_string(),
        node_id: node_id.to_string(),
    })
}
