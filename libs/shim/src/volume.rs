//! Volume binder interface for the pod assumption handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use gantry_model::Pod;

/// Persistent volume claims referenced by a pod. Opaque to the shim.
#[derive(Debug, Clone, Default)]
pub struct VolumeClaims {
    pub claims: Vec<String>,
}

/// Volumes selected for a pod on a specific node. Opaque to the shim.
#[derive(Debug, Clone, Default)]
pub struct PodVolumes {
    pub volumes: Vec<String>,
}

/// Result of matching a pod's claims against a node.
#[derive(Debug, Clone, Default)]
pub struct FindPodVolumesResult {
    pub volumes: PodVolumes,
    /// Non-empty when the node cannot satisfy the claims.
    pub conflict_reasons: Vec<String>,
}

#[async_trait]
pub trait VolumeBinder: Send + Sync {
    async fn get_pod_volume_claims(&self, pod: &Pod) -> Result<VolumeClaims>;

    async fn find_pod_volumes(
        &self,
        pod: &Pod,
        claims: &VolumeClaims,
        node_id: &str,
    ) -> Result<FindPodVolumesResult>;

    /// Assume the volumes on the node. Returns true when every volume was
    /// already bound.
    async fn assume_pod_volumes(
        &self,
        pod: &Pod,
        node_id: &str,
        volumes: &PodVolumes,
    ) -> Result<bool>;
}

/// Mock binder with per-step failure switches.
pub struct MockVolumeBinder {
    claims_error: Mutex<Option<String>>,
    find_error: Mutex<Option<String>>,
    assume_error: Mutex<Option<String>>,
    conflict_reasons: Mutex<Vec<String>>,
    all_bound: AtomicBool,
}

impl MockVolumeBinder {
    pub fn new() -> Self {
        Self {
            claims_error: Mutex::new(None),
            find_error: Mutex::new(None),
            assume_error: Mutex::new(None),
            conflict_reasons: Mutex::new(Vec::new()),
            all_bound: AtomicBool::new(true),
        }
    }

    pub fn fail_volume_claims(&self, message: &str) {
        *self.claims_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_find_pod_volumes(&self, message: &str) {
        *self.find_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_assume_pod_volumes(&self, message: &str) {
        *self.assume_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_conflict_reasons(&self, reasons: &[&str]) {
        *self.conflict_reasons.lock().unwrap() =
            reasons.iter().map(|r| r.to_string()).collect();
    }

    pub fn set_all_bound(&self, all_bound: bool) {
        self.all_bound.store(all_bound, Ordering::SeqCst);
    }
}

impl Default for MockVolumeBinder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeBinder for MockVolumeBinder {
    async fn get_pod_volume_claims(&self, _pod: &Pod) -> Result<VolumeClaims> {
        if let Some(message) = self.claims_error.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        Ok(VolumeClaims::default())
    }

    async fn find_pod_volumes(
        &self,
        _pod: &Pod,
        _claims: &VolumeClaims,
        _node_id: &str,
    ) -> Result<FindPodVolumesResult> {
        if let Some(message) = self.find_error.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        Ok(FindPodVolumesResult {
            volumes: PodVolumes::default(),
            conflict_reasons: self.conflict_reasons.lock().unwrap().clone(),
        })
    }

    async fn assume_pod_volumes(
        &self,
        _pod: &Pod,
        _node_id: &str,
        _volumes: &PodVolumes,
    ) -> Result<bool> {
        if let Some(message) = self.assume_error.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        Ok(self.all_bound.load(Ordering::SeqCst))
    }
}
