//! Production drivers for the capability traits
//!
//! Everything here talks to a real API server: dynamic server-side apply,
//! BundleDeployment access with status writeback, release records stored in
//! Secrets, and label-filtered watches for drift events.

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ObjectMeta, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde_json::json;
use stevedore_core::{BundleDeploymentStatus, Manifest, Release, ResourceRef};
use tracing::warn;

use crate::crd::BundleDeployment;
use crate::drift::ResourceEvent;
use crate::error::{KubeError, Result};
use crate::reconciler::OWNER_LABEL;
use crate::traits::{ApplyOutcome, DeploymentKey, DeploymentStore, ReleaseStore, ResourceApplier};

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "stevedore";

use async_trait::async_trait;

/// Dynamic resource applier backed by API discovery
pub struct ClusterApplier {
    client: Client,
    discovery: Discovery,
}

impl ClusterApplier {
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(KubeError::Api)?;
        Ok(Self { client, discovery })
    }

    fn api_for(&self, reference: &ResourceRef) -> Result<Api<DynamicObject>> {
        let gvk = gvk_from_ref(reference);
        let (api_resource, capabilities) =
            self.discovery.resolve_gvk(&gvk).ok_or_else(|| KubeError::Apply {
                resource: reference.to_string(),
                message: format!(
                    "unknown resource type {}/{}",
                    reference.api_version, reference.kind
                ),
            })?;

        Ok(if capabilities.scope == Scope::Namespaced {
            let ns = reference.namespace.as_deref().unwrap_or("default");
            Api::namespaced_with(self.client.clone(), ns, &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        })
    }
}

#[async_trait]
impl ResourceApplier for ClusterApplier {
    async fn get(&self, reference: &ResourceRef) -> Result<Option<serde_json::Value>> {
        let api = self.api_for(reference)?;
        let object = api.get_opt(&reference.name).await.map_err(KubeError::Api)?;
        match object {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn apply(&self, manifest: &Manifest) -> Result<ApplyOutcome> {
        let reference = &manifest.reference;
        let api = self.api_for(reference)?;

        let exists = api
            .get_opt(&reference.name)
            .await
            .map_err(KubeError::Api)?
            .is_some();

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&reference.name, &params, &Patch::Apply(&manifest.content))
            .await
            .map_err(|e| {
                if KubeError::is_conflict(&e) {
                    KubeError::Conflict {
                        resource: reference.to_string(),
                    }
                } else {
                    KubeError::Apply {
                        resource: reference.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        Ok(if exists {
            ApplyOutcome::Configured
        } else {
            ApplyOutcome::Created
        })
    }

    async fn delete(&self, reference: &ResourceRef) -> Result<()> {
        let api = self.api_for(reference)?;
        let params = DeleteParams::background();

        match api.delete(&reference.name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if KubeError::is_not_found(&e) => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

/// BundleDeployment access via the CRD API
#[derive(Clone)]
pub struct CrdStore {
    client: Client,
}

impl CrdStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<BundleDeployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DeploymentStore for CrdStore {
    async fn get(&self, key: &DeploymentKey) -> Result<Option<BundleDeployment>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(KubeError::Api)
    }

    async fn update_status(
        &self,
        key: &DeploymentKey,
        status: &BundleDeploymentStatus,
    ) -> Result<()> {
        let patch = Patch::Merge(json!({ "status": status }));
        match self
            .api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &patch)
            .await
        {
            Ok(_) => Ok(()),
            // Deleted mid-pass; the teardown pass will follow
            Err(e) if KubeError::is_not_found(&e) => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

/// Release records stored as one Secret per deployment
pub struct SecretReleaseStore {
    api: Api<Secret>,
}

const RELEASE_DATA_KEY: &str = "release";

impl SecretReleaseStore {
    /// `namespace` is where release Secrets live, not where workloads go
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    fn secret_name(key: &DeploymentKey) -> String {
        format!("stevedore-release-{}-{}", key.namespace, key.name)
    }
}

#[async_trait]
impl ReleaseStore for SecretReleaseStore {
    async fn load(&self, key: &DeploymentKey) -> Result<Option<Release>> {
        let secret = self
            .api
            .get_opt(&Self::secret_name(key))
            .await
            .map_err(KubeError::Api)?;

        let Some(secret) = secret else { return Ok(None) };
        let payload = secret
            .data
            .as_ref()
            .and_then(|data| data.get(RELEASE_DATA_KEY))
            .ok_or_else(|| {
                KubeError::ReleaseStore(format!(
                    "secret {} has no {} key",
                    Self::secret_name(key),
                    RELEASE_DATA_KEY
                ))
            })?;

        let release = serde_json::from_slice(&payload.0)
            .map_err(|e| KubeError::ReleaseStore(format!("corrupt release record: {}", e)))?;
        Ok(Some(release))
    }

    async fn save(&self, key: &DeploymentKey, release: &Release) -> Result<()> {
        let name = Self::secret_name(key);
        let mut data = BTreeMap::new();
        data.insert(
            RELEASE_DATA_KEY.to_string(),
            ByteString(serde_json::to_vec(release)?),
        );

        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        );

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api
            .patch(&name, &params, &Patch::Apply(&secret))
            .await
            .map_err(|e| KubeError::ReleaseStore(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &DeploymentKey) -> Result<()> {
        match self
            .api
            .delete(&Self::secret_name(key), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if KubeError::is_not_found(&e) => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

/// Watch one resource kind for drift, filtered to resources this engine owns
pub fn watch_owned(
    client: Client,
    api_resource: ApiResource,
) -> impl Stream<Item = ResourceEvent> {
    let api: Api<DynamicObject> = Api::all_with(client, &api_resource);
    let config = watcher::Config::default().labels(OWNER_LABEL);

    watcher(api, config).filter_map(move |event| {
        let api_resource = api_resource.clone();
        async move {
            match event {
                Ok(watcher::Event::Apply(object))
                | Ok(watcher::Event::InitApply(object)) => {
                    Some(resource_event(&api_resource, &object, false))
                }
                Ok(watcher::Event::Delete(object)) => {
                    Some(resource_event(&api_resource, &object, true))
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(kind = %api_resource.kind, error = %e, "drift watch error");
                    None
                }
            }
        }
    })
}

/// Watch bundle deployments themselves, yielding keys to reconcile.
/// Deletions yield the key too; the pass sees the store miss and tears down.
pub fn watch_deployments(client: Client) -> impl Stream<Item = DeploymentKey> {
    let api: Api<BundleDeployment> = Api::all(client);

    watcher(api, watcher::Config::default()).filter_map(|event| async move {
        match event {
            Ok(watcher::Event::Apply(deployment))
            | Ok(watcher::Event::InitApply(deployment))
            | Ok(watcher::Event::Delete(deployment)) => Some(DeploymentKey::new(
                deployment.namespace().unwrap_or_default(),
                deployment.name_any(),
            )),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "deployment watch error");
                None
            }
        }
    })
}

fn resource_event(
    api_resource: &ApiResource,
    object: &DynamicObject,
    deleted: bool,
) -> ResourceEvent {
    ResourceEvent {
        reference: ResourceRef {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
            namespace: object.namespace(),
            name: object.name_any(),
        },
        labels: object.labels().clone(),
        deleted,
    }
}

/// Parse an apiVersion string into a GroupVersionKind:
/// "apps/v1" has a group, bare "v1" is the core API
fn gvk_from_ref(reference: &ResourceRef) -> GroupVersionKind {
    let (group, version) = match reference.api_version.rsplit_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), reference.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: reference.kind.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(api_version: &str, kind: &str) -> ResourceRef {
        ResourceRef {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: Some("default".to_string()),
            name: "demo".to_string(),
        }
    }

    #[test]
    fn test_gvk_core_api() {
        let gvk = gvk_from_ref(&reference("v1", "ConfigMap"));
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "ConfigMap");
    }

    #[test]
    fn test_gvk_grouped_api() {
        let gvk = gvk_from_ref(&reference("apps/v1", "Deployment"));
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");

        let gvk = gvk_from_ref(&reference("networking.k8s.io/v1", "Ingress"));
        assert_eq!(gvk.group, "networking.k8s.io");
        assert_eq!(gvk.version, "v1");
    }

    #[test]
    fn test_secret_name_derivation() {
        let key = DeploymentKey::new("ahoy-ns", "ahoy");
        assert_eq!(
            SecretReleaseStore::secret_name(&key),
            "stevedore-release-ahoy-ns-ahoy"
        );
    }
}
