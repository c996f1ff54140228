//! Bundle deployment spec and status types
//!
//! These are the serde shapes embedded in the `BundleDeployment` custom
//! resource. They carry no Kubernetes client types so they can be used by
//! every layer of the pipeline.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;

/// Provisioner class handled by this engine. Deployments carrying any other
/// class are ignored by the reconcile loop.
pub const PROVISIONER_ID: &str = "stevedore.io/chart";

/// Template for the bundle a deployment wants installed.
///
/// A change to the template produces a new bundle generation; the resolved
/// bundle itself is never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleTemplate {
    /// Metadata stamped onto the resolved bundle
    #[serde(default)]
    pub metadata: TemplateMetadata,

    /// Bundle spec
    pub spec: BundleSpec,
}

/// Labels and annotations for resolved bundles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Where packaged content comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Provisioner class that should unpack this bundle
    pub provisioner_class_name: String,

    /// Source location of the packaged chart
    pub source: BundleSource,
}

/// Source descriptor: type plus the matching location block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleSource {
    /// Source type
    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// HTTP source location, set when `type` is `http`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSource>,
}

impl BundleSource {
    /// The URL for an HTTP source, if this descriptor is one
    pub fn http_url(&self) -> Option<&str> {
        match self.source_type {
            SourceType::Http => self.http.as_ref().map(|h| h.url.as_str()),
        }
    }
}

/// Supported source transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Http,
}

/// HTTP(S) source: a fully-qualified URL to a chart archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub url: String,
}

/// Observed state of a bundle deployment.
///
/// Conditions are the sole source of truth for reconciliation outcome;
/// `activeBundle` stays empty until a release has been applied at least once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentStatus {
    /// Identity of the currently-installed release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_bundle: Option<String>,

    /// Per-stage outcome conditions, overwritten per type on every pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
