//! In-memory drivers for the capability traits
//!
//! Test doubles with failure injection: apply conflicts, per-resource apply
//! failures, and out-of-band mutation to simulate drift.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use stevedore_core::{merge_values, BundleDeploymentStatus, Manifest, Release, ResourceRef};

use crate::crd::BundleDeployment;
use crate::error::{KubeError, Result};
use crate::traits::{ApplyOutcome, DeploymentKey, DeploymentStore, ReleaseStore, ResourceApplier};

/// In-memory deployment store
#[derive(Default)]
pub struct MemoryStore {
    deployments: Mutex<HashMap<DeploymentKey, BundleDeployment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: DeploymentKey, deployment: BundleDeployment) {
        self.deployments.lock().unwrap().insert(key, deployment);
    }

    pub fn remove(&self, key: &DeploymentKey) {
        self.deployments.lock().unwrap().remove(key);
    }

    /// The status last written through `update_status`
    pub fn status(&self, key: &DeploymentKey) -> Option<BundleDeploymentStatus> {
        self.deployments
            .lock()
            .unwrap()
            .get(key)
            .and_then(|d| d.status.clone())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn get(&self, key: &DeploymentKey) -> Result<Option<BundleDeployment>> {
        Ok(self.deployments.lock().unwrap().get(key).cloned())
    }

    async fn update_status(
        &self,
        key: &DeploymentKey,
        status: &BundleDeploymentStatus,
    ) -> Result<()> {
        // A deployment deleted mid-pass makes the writeback a no-op
        if let Some(deployment) = self.deployments.lock().unwrap().get_mut(key) {
            deployment.status = Some(status.clone());
        }
        Ok(())
    }
}

/// Per-operation counters for assertions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
}

#[derive(Default)]
struct ClusterState {
    objects: HashMap<ResourceRef, serde_json::Value>,
    counts: OperationCounts,
    conflicts_remaining: u32,
    fail_applies: HashSet<ResourceRef>,
}

/// In-memory cluster with apply semantics close to server-side apply:
/// desired fields are merged into the live object, fields set out of band
/// survive unless the desired state overwrites them.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a live object without counting it as an apply
    pub fn insert_object(&self, reference: ResourceRef, content: serde_json::Value) {
        self.state.lock().unwrap().objects.insert(reference, content);
    }

    /// Delete a live object out of band, simulating manual drift
    pub fn remove_object(&self, reference: &ResourceRef) {
        self.state.lock().unwrap().objects.remove(reference);
    }

    pub fn object(&self, reference: &ResourceRef) -> Option<serde_json::Value> {
        self.state.lock().unwrap().objects.get(reference).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn counts(&self) -> OperationCounts {
        self.state.lock().unwrap().counts
    }

    pub fn reset_counts(&self) {
        self.state.lock().unwrap().counts = OperationCounts::default();
    }

    /// Make the next `n` applies fail with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.state.lock().unwrap().conflicts_remaining = n;
    }

    /// Make every apply of `reference` fail
    pub fn fail_applies_of(&self, reference: ResourceRef) {
        self.state.lock().unwrap().fail_applies.insert(reference);
    }
}

#[async_trait]
impl ResourceApplier for MemoryCluster {
    async fn get(&self, reference: &ResourceRef) -> Result<Option<serde_json::Value>> {
        let mut state = self.state.lock().unwrap();
        state.counts.gets += 1;
        Ok(state.objects.get(reference).cloned())
    }

    async fn apply(&self, manifest: &Manifest) -> Result<ApplyOutcome> {
        let mut state = self.state.lock().unwrap();

        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(KubeError::Conflict {
                resource: manifest.reference.to_string(),
            });
        }
        if state.fail_applies.contains(&manifest.reference) {
            return Err(KubeError::Apply {
                resource: manifest.reference.to_string(),
                message: "injected apply failure".to_string(),
            });
        }

        match state.objects.get_mut(&manifest.reference) {
            Some(live) => {
                merge_values(live, &manifest.content);
                state.counts.patches += 1;
                Ok(ApplyOutcome::Configured)
            }
            None => {
                state
                    .objects
                    .insert(manifest.reference.clone(), manifest.content.clone());
                state.counts.creates += 1;
                Ok(ApplyOutcome::Created)
            }
        }
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counts.deletes += 1;
        state.objects.remove(reference);
        Ok(())
    }
}

/// In-memory release store
#[derive(Default)]
pub struct MemoryReleaseStore {
    releases: Mutex<HashMap<DeploymentKey, Release>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self, key: &DeploymentKey) -> Option<Release> {
        self.releases.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn load(&self, key: &DeploymentKey) -> Result<Option<Release>> {
        Ok(self.releases.lock().unwrap().get(key).cloned())
    }

    async fn save(&self, key: &DeploymentKey, release: &Release) -> Result<()> {
        self.releases
            .lock()
            .unwrap()
            .insert(key.clone(), release.clone());
        Ok(())
    }

    async fn delete(&self, key: &DeploymentKey) -> Result<()> {
        self.releases.lock().unwrap().remove(key);
        Ok(())
    }
}
