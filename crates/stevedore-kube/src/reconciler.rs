//! Three-way reconciliation: observe, plan, execute
//!
//! The plan compares previous release state, desired manifests, and live
//! cluster objects. A live object already carrying every desired field is
//! converged and produces no operation, which is what makes repeated passes
//! idempotent.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use stevedore_core::{Manifest, ManifestSet, ResourceRef};
use tracing::{debug, warn};

use crate::error::{KubeError, Result};
use crate::traits::{ApplyOutcome, DeploymentKey, ResourceApplier};

/// Label naming the owning bundle deployment, stamped on every applied
/// resource and used to route drift events back to their deployment
pub const OWNER_LABEL: &str = "stevedore.io/owner";

/// Namespace of the owning deployment
pub const OWNER_NAMESPACE_LABEL: &str = "stevedore.io/owner-namespace";

/// Release the resource belongs to
pub const RELEASE_LABEL: &str = "stevedore.io/release";

/// One step of a reconciliation plan, in apply order
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOp {
    Create(Manifest),
    Patch(Manifest),
    Delete(ResourceRef),
}

/// Knobs for plan execution
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Per-operation deadline
    pub apply_timeout: Duration,

    /// Retries for apply conflicts within a single pass
    pub conflict_retries: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            apply_timeout: Duration::from_secs(30),
            conflict_retries: 3,
        }
    }
}

/// What a plan execution changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub created: usize,
    pub configured: usize,
    pub deleted: usize,
}

impl ExecutionReport {
    /// Whether the pass changed anything on the cluster
    pub fn mutated(&self) -> bool {
        self.created + self.configured + self.deleted > 0
    }
}

/// Whether every field of `desired` is already present in `live`.
///
/// Objects are compared key by key so fields owned by other managers
/// (status, uid, defaulted fields) never count as divergence.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(desired_map), Value::Object(live_map)) => {
            desired_map.iter().all(|(key, desired_value)| {
                live_map
                    .get(key)
                    .is_some_and(|live_value| is_subset(desired_value, live_value))
            })
        }
        (desired, live) => desired == live,
    }
}

/// Stamp ownership labels onto every manifest of a set.
///
/// Resources applied without these labels would be invisible to drift
/// routing, so stamping happens before planning.
pub fn stamp_ownership(manifests: &mut ManifestSet, owner: &DeploymentKey, release: &str) {
    for manifest in manifests.iter_mut() {
        let metadata = manifest
            .content
            .get_mut("metadata")
            .and_then(Value::as_object_mut);
        let Some(metadata) = metadata else { continue };

        let labels = metadata
            .entry("labels")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(OWNER_LABEL.to_string(), Value::String(owner.name.clone()));
            labels.insert(
                OWNER_NAMESPACE_LABEL.to_string(),
                Value::String(owner.namespace.clone()),
            );
            labels.insert(RELEASE_LABEL.to_string(), Value::String(release.to_string()));
        }
    }
}

/// Fetch the live state of every resource the plan could touch: the union of
/// desired references and previous-release references.
pub async fn observe(
    applier: &dyn ResourceApplier,
    previous: Option<&ManifestSet>,
    desired: &ManifestSet,
) -> Result<HashMap<ResourceRef, Value>> {
    let mut live = HashMap::new();

    let references = desired
        .refs()
        .chain(previous.into_iter().flat_map(|set| set.refs()));
    for reference in references {
        if live.contains_key(reference) {
            continue;
        }
        if let Some(object) = applier.get(reference).await? {
            live.insert(reference.clone(), object);
        }
    }

    Ok(live)
}

/// Build the operation list for one pass.
///
/// Desired manifests keep their render order; prune deletes come last and
/// only target resources that are still live.
pub fn plan(
    previous: Option<&ManifestSet>,
    desired: &ManifestSet,
    live: &HashMap<ResourceRef, Value>,
) -> Vec<ResourceOp> {
    let mut ops = Vec::new();

    for manifest in desired.iter() {
        match live.get(&manifest.reference) {
            None => ops.push(ResourceOp::Create(manifest.clone())),
            Some(live_object) => {
                if !is_subset(&manifest.content, live_object) {
                    ops.push(ResourceOp::Patch(manifest.clone()));
                }
            }
        }
    }

    if let Some(previous) = previous {
        for reference in previous.refs() {
            if desired.get(reference).is_none() && live.contains_key(reference) {
                ops.push(ResourceOp::Delete(reference.clone()));
            }
        }
    }

    ops
}

/// Execute a plan in order, aborting on the first hard failure.
///
/// Conflicts are retried within the pass; a conflict that survives all
/// retries fails the pass and the next pass re-plans from fresh live state.
pub async fn execute(
    applier: &dyn ResourceApplier,
    ops: Vec<ResourceOp>,
    config: &ReconcilerConfig,
) -> Result<ExecutionReport> {
    let mut report = ExecutionReport::default();

    for op in ops {
        match op {
            ResourceOp::Create(manifest) | ResourceOp::Patch(manifest) => {
                match apply_with_retry(applier, &manifest, config).await? {
                    ApplyOutcome::Created => report.created += 1,
                    ApplyOutcome::Configured => report.configured += 1,
                }
            }
            ResourceOp::Delete(reference) => {
                debug!(resource = %reference, "pruning resource");
                timed(applier.delete(&reference), config.apply_timeout, &reference).await??;
                report.deleted += 1;
            }
        }
    }

    Ok(report)
}

async fn apply_with_retry(
    applier: &dyn ResourceApplier,
    manifest: &Manifest,
    config: &ReconcilerConfig,
) -> Result<ApplyOutcome> {
    let reference = &manifest.reference;
    let mut attempt = 0;

    loop {
        match timed(applier.apply(manifest), config.apply_timeout, reference).await? {
            Ok(outcome) => return Ok(outcome),
            Err(KubeError::Conflict { resource }) if attempt < config.conflict_retries => {
                attempt += 1;
                warn!(resource = %resource, attempt, "apply conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn timed<F, T>(fut: F, timeout: Duration, reference: &ResourceRef) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| KubeError::Apply {
            resource: reference.to_string(),
            message: "deadline exceeded".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCluster;
    use serde_json::json;

    fn cm(name: &str, value: &str) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "default"},
            "data": {"key": value},
        }))
        .unwrap()
    }

    fn set(manifests: Vec<Manifest>) -> ManifestSet {
        ManifestSet::new(manifests)
    }

    #[test]
    fn test_is_subset_ignores_server_fields() {
        let desired = json!({"data": {"key": "v"}});
        let live = json!({
            "data": {"key": "v"},
            "metadata": {"uid": "abc", "resourceVersion": "42"},
        });
        assert!(is_subset(&desired, &live));
    }

    #[test]
    fn test_is_subset_detects_changed_scalar() {
        let desired = json!({"data": {"key": "new"}});
        let live = json!({"data": {"key": "old"}});
        assert!(!is_subset(&desired, &live));
    }

    #[test]
    fn test_is_subset_detects_missing_key() {
        let desired = json!({"data": {"key": "v", "extra": "x"}});
        let live = json!({"data": {"key": "v"}});
        assert!(!is_subset(&desired, &live));
    }

    #[test]
    fn test_plan_creates_missing_resources() {
        let desired = set(vec![cm("a", "v")]);
        let ops = plan(None, &desired, &HashMap::new());
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], ResourceOp::Create(m) if m.reference.name == "a"));
    }

    #[test]
    fn test_plan_skips_converged_resources() {
        let desired = set(vec![cm("a", "v")]);
        let mut live = HashMap::new();
        let mut live_object = cm("a", "v").content;
        live_object["metadata"]["uid"] = json!("abc");
        live.insert(desired.refs().next().unwrap().clone(), live_object);

        assert!(plan(None, &desired, &live).is_empty());
    }

    #[test]
    fn test_plan_patches_diverged_resources() {
        let desired = set(vec![cm("a", "new")]);
        let mut live = HashMap::new();
        live.insert(desired.refs().next().unwrap().clone(), cm("a", "old").content);

        let ops = plan(None, &desired, &live);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], ResourceOp::Patch(_)));
    }

    #[test]
    fn test_plan_prunes_dropped_resources() {
        let previous = set(vec![cm("a", "v"), cm("b", "v")]);
        let desired = set(vec![cm("a", "v")]);

        let dropped = previous.refs().nth(1).unwrap().clone();
        let mut live = HashMap::new();
        live.insert(desired.refs().next().unwrap().clone(), cm("a", "v").content);
        live.insert(dropped.clone(), cm("b", "v").content);

        let ops = plan(Some(&previous), &desired, &live);
        assert_eq!(ops, vec![ResourceOp::Delete(dropped)]);
    }

    #[test]
    fn test_plan_skips_prune_of_already_gone_resources() {
        let previous = set(vec![cm("a", "v"), cm("b", "v")]);
        let desired = set(vec![cm("a", "v")]);
        let mut live = HashMap::new();
        live.insert(desired.refs().next().unwrap().clone(), cm("a", "v").content);

        assert!(plan(Some(&previous), &desired, &live).is_empty());
    }

    #[test]
    fn test_stamp_ownership() {
        let mut manifests = set(vec![cm("a", "v")]);
        let owner = DeploymentKey::new("ns", "ahoy");
        stamp_ownership(&mut manifests, &owner, "ahoy-hello-world");

        let labels = &manifests.iter().next().unwrap().content["metadata"]["labels"];
        assert_eq!(labels[OWNER_LABEL], "ahoy");
        assert_eq!(labels[OWNER_NAMESPACE_LABEL], "ns");
        assert_eq!(labels[RELEASE_LABEL], "ahoy-hello-world");
    }

    #[tokio::test]
    async fn test_execute_reports_mutations() {
        let cluster = MemoryCluster::new();
        cluster.apply(&cm("patched", "old")).await.unwrap();
        cluster.apply(&cm("pruned", "v")).await.unwrap();
        cluster.reset_counts();

        let ops = vec![
            ResourceOp::Create(cm("created", "v")),
            ResourceOp::Patch(cm("patched", "new")),
            ResourceOp::Delete(cm("pruned", "v").reference),
        ];

        let report = execute(&cluster, ops, &ReconcilerConfig::default())
            .await
            .unwrap();
        assert_eq!(
            report,
            ExecutionReport {
                created: 1,
                configured: 1,
                deleted: 1,
            }
        );
        assert!(report.mutated());
    }

    #[tokio::test]
    async fn test_execute_retries_conflicts() {
        let cluster = MemoryCluster::new();
        cluster.inject_conflicts(2);

        let report = execute(
            &cluster,
            vec![ResourceOp::Create(cm("a", "v"))],
            &ReconcilerConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.created, 1);
    }

    #[tokio::test]
    async fn test_execute_fails_after_retry_budget() {
        let cluster = MemoryCluster::new();
        cluster.inject_conflicts(10);

        let err = execute(
            &cluster,
            vec![ResourceOp::Create(cm("a", "v"))],
            &ReconcilerConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KubeError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_observe_collects_union_of_refs() {
        let cluster = MemoryCluster::new();
        cluster.apply(&cm("kept", "v")).await.unwrap();
        cluster.apply(&cm("dropped", "v")).await.unwrap();

        let previous = set(vec![cm("kept", "v"), cm("dropped", "v")]);
        let desired = set(vec![cm("kept", "v"), cm("new", "v")]);

        let live = observe(&cluster, Some(&previous), &desired).await.unwrap();
        assert_eq!(live.len(), 2);
    }
}
