//! Capability traits between the reconcile loop and the cluster
//!
//! The provisioner only talks to these traits. Production wiring lives in
//! `client`; in-memory drivers for tests live in `memory`.

use async_trait::async_trait;
use stevedore_core::{BundleDeploymentStatus, Manifest, Release, ResourceRef};

use crate::crd::BundleDeployment;
use crate::error::Result;

/// Namespace/name pair identifying one bundle deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentKey {
    pub namespace: String,
    pub name: String,
}

impl DeploymentKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read access to bundle deployments plus status writeback
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Fetch the current object, or None when it no longer exists
    async fn get(&self, key: &DeploymentKey) -> Result<Option<BundleDeployment>>;

    /// Replace the status subresource
    async fn update_status(
        &self,
        key: &DeploymentKey,
        status: &BundleDeploymentStatus,
    ) -> Result<()>;
}

/// What a single apply did on the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The resource did not exist before
    Created,
    /// The resource existed and was patched
    Configured,
}

/// Typed access to arbitrary cluster resources
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Fetch the live object, or None when absent
    async fn get(&self, reference: &ResourceRef) -> Result<Option<serde_json::Value>>;

    /// Server-side apply one manifest
    async fn apply(&self, manifest: &Manifest) -> Result<ApplyOutcome>;

    /// Delete a resource; an already-absent resource is not an error
    async fn delete(&self, reference: &ResourceRef) -> Result<()>;
}

/// Persistence for the release record of each deployment
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn load(&self, key: &DeploymentKey) -> Result<Option<Release>>;

    async fn save(&self, key: &DeploymentKey, release: &Release) -> Result<()>;

    /// Remove the record; missing records are not an error
    async fn delete(&self, key: &DeploymentKey) -> Result<()>;
}
