//! Stevedore Kube - reconciling bundle deployments against a cluster
//!
//! This crate holds the whole cluster-facing side of the engine:
//! - `BundleDeployment` custom resource definition
//! - capability traits (`DeploymentStore`, `ResourceApplier`, `ReleaseStore`)
//!   with production drivers in `client` and in-memory drivers in `memory`
//! - three-way reconciliation (observe, plan, execute)
//! - drift routing, the dedup work queue, and the controller loop

pub mod client;
pub mod controller;
pub mod crd;
pub mod drift;
pub mod error;
pub mod memory;
pub mod provisioner;
pub mod queue;
pub mod reconciler;
pub mod traits;

pub use client::{watch_deployments, watch_owned, ClusterApplier, CrdStore, SecretReleaseStore};
pub use controller::{Controller, ControllerConfig};
pub use crd::{BundleDeployment, BundleDeploymentSpec};
pub use drift::ResourceEvent;
pub use error::KubeError;
pub use memory::{MemoryCluster, MemoryReleaseStore, MemoryStore};
pub use provisioner::{
    FailureClass, Provisioner, ProvisionerConfig, ReconcileFailure, ReconcileOutcome,
};
pub use queue::{Backoff, WorkQueue};
pub use reconciler::{ReconcilerConfig, OWNER_LABEL, OWNER_NAMESPACE_LABEL, RELEASE_LABEL};
pub use traits::{
    ApplyOutcome, DeploymentKey, DeploymentStore, ReleaseStore, ResourceApplier,
};
