//! The BundleDeployment custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stevedore_core::{BundleDeploymentStatus, BundleTemplate};

/// Desired state: which bundle to install and how to configure it
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stevedore.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    namespaced,
    status = "BundleDeploymentStatus",
    shortname = "bd"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentSpec {
    /// Provisioner class responsible for this deployment. Deployments with a
    /// foreign class are skipped, not failed.
    pub provisioner_class_name: String,

    /// Template for the bundle to install
    pub template: BundleTemplate,

    /// Value overrides merged over the chart's defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}
