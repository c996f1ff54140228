//! The chart provisioner: one full reconcile pass per deployment
//!
//! Pipeline per pass: fetch the source archive, validate and unpack it,
//! render the chart, stamp ownership, plan against live state, execute, and
//! write back status conditions. Every stage failure maps to a condition
//! update; the returned failure class tells the controller how to requeue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stevedore_core::{
    find_condition, release_name, unpack_chart, upsert_condition, BundleDeploymentStatus,
    Condition, ConditionStatus, ReconcileState, Release, PROVISIONER_ID,
    REASON_INSTALLATION_SUCCEEDED, REASON_INSTALL_FAILED, REASON_UNPACK_FAILED,
    REASON_UNPACK_SUCCESSFUL, TYPE_HAS_VALID_BUNDLE, TYPE_INSTALLED,
};
use stevedore_engine::{ChartRenderer, RenderContext};
use stevedore_fetch::BundleFetcher;
use tracing::{debug, info, warn};

use crate::crd::BundleDeployment;
use crate::error::Result;
use crate::reconciler::{self, ReconcilerConfig};
use crate::traits::{DeploymentKey, DeploymentStore, ReleaseStore, ResourceApplier};

/// How a failed pass should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying soon with backoff (network, API, conflicts)
    Transient,

    /// The content itself is bad; retrying cannot help until the source
    /// changes, so requeue on a long fixed interval
    TerminalContent,
}

/// A failed reconcile pass
#[derive(Debug)]
pub struct ReconcileFailure {
    pub message: String,
    pub class: FailureClass,
}

impl std::fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ReconcileFailure {}

/// A successful reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Desired state is live; `mutated` says whether this pass changed
    /// anything
    Converged { mutated: bool },

    /// The deployment is gone and its resources were torn down
    Removed,

    /// The deployment belongs to a different provisioner class
    Skipped,
}

/// Provisioner tuning
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Consecutive install failures before a prior `Installed=True` is
    /// downgraded
    pub flap_threshold: u32,

    pub reconciler: ReconcilerConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            flap_threshold: 3,
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// Reconciles bundle deployments against the cluster
pub struct Provisioner {
    store: Arc<dyn DeploymentStore>,
    applier: Arc<dyn ResourceApplier>,
    releases: Arc<dyn ReleaseStore>,
    fetcher: Arc<dyn BundleFetcher>,
    renderer: ChartRenderer,
    config: ProvisionerConfig,
    states: Mutex<HashMap<DeploymentKey, ReconcileState>>,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        applier: Arc<dyn ResourceApplier>,
        releases: Arc<dyn ReleaseStore>,
        fetcher: Arc<dyn BundleFetcher>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            store,
            applier,
            releases,
            fetcher,
            renderer: ChartRenderer::new(),
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Run one full pass for a deployment key
    pub async fn reconcile(
        &self,
        key: &DeploymentKey,
    ) -> std::result::Result<ReconcileOutcome, ReconcileFailure> {
        let deployment = self
            .store
            .get(key)
            .await
            .map_err(|e| transient(e.to_string()))?;

        let Some(deployment) = deployment else {
            self.teardown(key).await.map_err(|e| transient(e.to_string()))?;
            return Ok(ReconcileOutcome::Removed);
        };

        if deployment.spec.provisioner_class_name != PROVISIONER_ID {
            debug!(
                deployment = %key,
                class = %deployment.spec.provisioner_class_name,
                "foreign provisioner class, skipping",
            );
            return Ok(ReconcileOutcome::Skipped);
        }

        let mut status = deployment.status.clone().unwrap_or_default();

        // Stage 1: fetch + unpack + validate
        let source = &deployment.spec.template.spec.source;
        let chart = match self.fetcher.fetch(source).await {
            Ok(bytes) => match unpack_chart(&bytes) {
                Ok(chart) => chart,
                Err(e) => {
                    let failure = ReconcileFailure {
                        message: e.to_string(),
                        class: FailureClass::TerminalContent,
                    };
                    self.record_unpack_failure(key, &deployment, status, &failure.message)
                        .await?;
                    return Err(failure);
                }
            },
            Err(e) => {
                let failure = transient(e.to_string());
                self.record_unpack_failure(key, &deployment, status, &failure.message)
                    .await?;
                return Err(failure);
            }
        };

        upsert_condition(
            &mut status.conditions,
            Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::True,
                REASON_UNPACK_SUCCESSFUL,
                format!(
                    "successfully unpacked chart \"{}-{}\"",
                    chart.metadata.name, chart.metadata.version
                ),
            ),
        );

        // Stage 2: render
        let release = release_name(&key.name, &chart.metadata.name);
        let ctx = RenderContext {
            release_name: release.clone(),
            namespace: key.namespace.clone(),
            overrides: deployment.spec.config.clone(),
        };
        let mut desired = match self.renderer.render(&chart, &ctx) {
            Ok(set) => set,
            Err(e) => {
                let failure = ReconcileFailure {
                    message: e.to_string(),
                    class: FailureClass::TerminalContent,
                };
                self.record_install_failure(key, &deployment, status, &failure.message)
                    .await?;
                return Err(failure);
            }
        };
        reconciler::stamp_ownership(&mut desired, key, &release);

        // Stage 3: plan and execute against live state
        let previous = self
            .releases
            .load(key)
            .await
            .map_err(|e| transient(e.to_string()))?;
        let previous_manifests = previous.as_ref().map(|r| &r.manifests);

        let result = async {
            let live = reconciler::observe(
                self.applier.as_ref(),
                previous_manifests,
                &desired,
            )
            .await?;
            let ops = reconciler::plan(previous_manifests, &desired, &live);
            reconciler::execute(self.applier.as_ref(), ops, &self.config.reconciler).await
        }
        .await;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                let failure = transient(e.to_string());
                self.record_install_failure(key, &deployment, status, &failure.message)
                    .await?;
                return Err(failure);
            }
        };

        // Stage 4: persist the release record
        let changed = match &previous {
            None => true,
            Some(prev) => {
                report.mutated() || prev.manifests.digest() != desired.digest()
            }
        };
        if changed {
            let next = match &previous {
                None => Release::new(release.clone(), 1, desired),
                Some(prev) => {
                    let mut next =
                        Release::new(release.clone(), prev.revision + 1, desired);
                    next.created_at = prev.created_at;
                    next
                }
            };
            self.releases
                .save(key, &next)
                .await
                .map_err(|e| transient(e.to_string()))?;
            info!(deployment = %key, release = %release, revision = next.revision, "release persisted");
        }

        // Stage 5: success conditions
        self.state(key, ReconcileState::reset_install_failures);
        upsert_condition(
            &mut status.conditions,
            Condition::new(
                TYPE_INSTALLED,
                ConditionStatus::True,
                REASON_INSTALLATION_SUCCEEDED,
                format!("instantiated bundle \"{}\"", release),
            ),
        );
        status.active_bundle = Some(release);

        self.write_status(key, &deployment, status)
            .await
            .map_err(|e| transient(e.to_string()))?;

        Ok(ReconcileOutcome::Converged {
            mutated: report.mutated(),
        })
    }

    /// Delete everything a removed deployment left behind
    async fn teardown(&self, key: &DeploymentKey) -> Result<()> {
        if let Some(release) = self.releases.load(key).await? {
            info!(deployment = %key, release = %release.name, "tearing down removed deployment");
            for reference in release.manifests.refs() {
                self.applier.delete(reference).await?;
            }
            self.releases.delete(key).await?;
        }
        self.states.lock().unwrap().remove(key);
        Ok(())
    }

    /// Fetch/unpack/lint failure: the bundle is invalid. A deployment that
    /// was never installed also gets `Installed=False` so its status is
    /// complete; a previously healthy install keeps `Installed=True`.
    async fn record_unpack_failure(
        &self,
        key: &DeploymentKey,
        deployment: &BundleDeployment,
        mut status: BundleDeploymentStatus,
        message: &str,
    ) -> std::result::Result<(), ReconcileFailure> {
        warn!(deployment = %key, message, "bundle unpack failed");
        upsert_condition(
            &mut status.conditions,
            Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::False,
                REASON_UNPACK_FAILED,
                message,
            ),
        );

        if find_condition(&status.conditions, TYPE_INSTALLED).is_none() {
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    TYPE_INSTALLED,
                    ConditionStatus::False,
                    REASON_INSTALL_FAILED,
                    message,
                ),
            );
        }

        self.write_status(key, deployment, status)
            .await
            .map_err(|e| transient(e.to_string()))
    }

    /// Render/apply failure. Downgrading a healthy `Installed=True` waits for
    /// `flap_threshold` consecutive failures so one flaky pass does not flip
    /// the status.
    async fn record_install_failure(
        &self,
        key: &DeploymentKey,
        deployment: &BundleDeployment,
        mut status: BundleDeploymentStatus,
        message: &str,
    ) -> std::result::Result<(), ReconcileFailure> {
        warn!(deployment = %key, message, "install failed");
        let over_threshold = self.state(key, |state| {
            state.record_install_failure(self.config.flap_threshold)
        });

        let was_healthy = find_condition(&status.conditions, TYPE_INSTALLED)
            .is_some_and(|c| c.status == ConditionStatus::True);
        if !was_healthy || over_threshold {
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    TYPE_INSTALLED,
                    ConditionStatus::False,
                    REASON_INSTALL_FAILED,
                    message,
                ),
            );
        }

        self.write_status(key, deployment, status)
            .await
            .map_err(|e| transient(e.to_string()))
    }

    /// Write status back, skipping the API call when nothing changed
    async fn write_status(
        &self,
        key: &DeploymentKey,
        deployment: &BundleDeployment,
        status: BundleDeploymentStatus,
    ) -> Result<()> {
        if deployment.status.as_ref() == Some(&status) {
            debug!(deployment = %key, "status unchanged, skipping writeback");
            return Ok(());
        }
        self.store.update_status(key, &status).await
    }

    fn state<T>(&self, key: &DeploymentKey, f: impl FnOnce(&mut ReconcileState) -> T) -> T {
        let mut states = self.states.lock().unwrap();
        f(states.entry(key.clone()).or_default())
    }
}

fn transient(message: String) -> ReconcileFailure {
    ReconcileFailure {
        message,
        class: FailureClass::Transient,
    }
}
