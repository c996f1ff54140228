//! Releases and manifest sets
//!
//! A release is the materialized result of one successful render+apply cycle:
//! a deterministic name, a monotonically increasing revision, and the ordered
//! manifest set it applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Identity of a single cluster resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// One rendered resource manifest: its identity plus the full document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub reference: ResourceRef,
    pub content: serde_json::Value,
}

impl Manifest {
    /// Build a manifest from a rendered document.
    ///
    /// The document must be a mapping with `apiVersion`, `kind`, and
    /// `metadata.name`; that is the contract the reconciler consumes.
    pub fn from_value(content: serde_json::Value) -> Result<Self> {
        let api_version = content
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidManifest {
                message: "document missing apiVersion".to_string(),
            })?
            .to_string();

        let kind = content
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidManifest {
                message: "document missing kind".to_string(),
            })?
            .to_string();

        let metadata = content.get("metadata").ok_or_else(|| CoreError::InvalidManifest {
            message: format!("{} document missing metadata", kind),
        })?;

        let name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidManifest {
                message: format!("{} document missing metadata.name", kind),
            })?
            .to_string();

        let namespace = metadata
            .get("namespace")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            reference: ResourceRef {
                api_version,
                kind,
                namespace,
                name,
            },
            content,
        })
    }
}

/// Ordered set of rendered manifests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestSet {
    manifests: Vec<Manifest>,
}

impl ManifestSet {
    pub fn new(manifests: Vec<Manifest>) -> Self {
        Self { manifests }
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.manifests.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Manifest> {
        self.manifests.iter_mut()
    }

    /// References of every manifest, in apply order
    pub fn refs(&self) -> impl Iterator<Item = &ResourceRef> {
        self.manifests.iter().map(|m| &m.reference)
    }

    pub fn get(&self, reference: &ResourceRef) -> Option<&Manifest> {
        self.manifests.iter().find(|m| &m.reference == reference)
    }

    /// Stable content digest of the set.
    ///
    /// serde_json serializes objects with sorted keys, so identical desired
    /// state always hashes identically regardless of construction order
    /// within a document.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for manifest in &self.manifests {
            // Vec<u8> serialization of a Value cannot fail
            if let Ok(bytes) = serde_json::to_vec(&manifest.content) {
                hasher.update(&bytes);
                hasher.update([0u8]);
            }
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// The materialized result of one successful render+apply cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Deterministic name: `<deploymentName>-<chartName>`
    pub name: String,

    /// Monotonically increasing per deployment (1-indexed)
    pub revision: u32,

    pub manifests: ManifestSet,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Release {
    pub fn new(name: String, revision: u32, manifests: ManifestSet) -> Self {
        let now = Utc::now();
        Self {
            name,
            revision,
            manifests,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive the release name for a deployment/chart pair.
///
/// Child resources produced by the release are named after this.
pub fn release_name(deployment_name: &str, chart_name: &str) -> String {
    format!("{}-{}", deployment_name, chart_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configmap(name: &str, value: &str) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "default"},
            "data": {"key": value},
        }))
        .unwrap()
    }

    #[test]
    fn test_release_name_derivation() {
        assert_eq!(release_name("ahoy-abc12", "hello-world"), "ahoy-abc12-hello-world");
    }

    #[test]
    fn test_manifest_from_value() {
        let manifest = configmap("demo", "v");
        assert_eq!(manifest.reference.kind, "ConfigMap");
        assert_eq!(manifest.reference.name, "demo");
        assert_eq!(manifest.reference.namespace.as_deref(), Some("default"));
        assert_eq!(manifest.reference.to_string(), "default/ConfigMap/demo");
    }

    #[test]
    fn test_manifest_rejects_nameless_document() {
        let err = Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {},
        }))
        .unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let a = ManifestSet::new(vec![configmap("demo", "v1")]);
        let b = ManifestSet::new(vec![configmap("demo", "v1")]);
        let c = ManifestSet::new(vec![configmap("demo", "v2")]);

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert!(a.digest().starts_with("sha256:"));
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let ab = ManifestSet::new(vec![configmap("a", "v"), configmap("b", "v")]);
        let ba = ManifestSet::new(vec![configmap("b", "v"), configmap("a", "v")]);
        assert_ne!(ab.digest(), ba.digest());
    }
}
