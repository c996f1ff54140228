//! Stevedore operator - installs chart bundles declared by BundleDeployment
//! resources and keeps them converged.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::core::ApiResource;
use kube::Client;
use stevedore_fetch::HttpFetcher;
use stevedore_kube::{
    drift, watch_deployments, watch_owned, Backoff, ClusterApplier, Controller,
    ControllerConfig, CrdStore, Provisioner, ProvisionerConfig, ReconcilerConfig,
    SecretReleaseStore, WorkQueue,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stevedore")]
#[command(version)]
#[command(about = "Chart bundle deployment operator", long_about = None)]
struct Args {
    /// Concurrent reconcile workers
    #[arg(long, default_value_t = 4, env = "STEVEDORE_WORKERS")]
    workers: usize,

    /// Base delay for transient-failure backoff, in milliseconds
    #[arg(long, default_value_t = 1000)]
    backoff_base_ms: u64,

    /// Cap for transient-failure backoff, in seconds
    #[arg(long, default_value_t = 300)]
    backoff_max_secs: u64,

    /// Periodic resync interval for converged deployments, in seconds
    #[arg(long, default_value_t = 300)]
    resync_secs: u64,

    /// Requeue interval after terminal content failures, in seconds
    #[arg(long, default_value_t = 600)]
    content_error_requeue_secs: u64,

    /// Consecutive failures before a healthy Installed status is downgraded
    #[arg(long, default_value_t = 3)]
    flap_threshold: u32,

    /// Per-request timeout for bundle fetches, in seconds
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,

    /// Per-operation timeout for cluster applies, in seconds
    #[arg(long, default_value_t = 30)]
    apply_timeout_secs: u64,

    /// Namespace holding release record Secrets
    #[arg(long, default_value = "stevedore-system", env = "STEVEDORE_RELEASE_NAMESPACE")]
    release_namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let client = Client::try_default().await?;

    let store = Arc::new(CrdStore::new(client.clone()));
    let applier = Arc::new(ClusterApplier::new(client.clone()).await?);
    let releases = Arc::new(SecretReleaseStore::new(
        client.clone(),
        &args.release_namespace,
    ));
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        args.fetch_timeout_secs,
    ))?);

    let provisioner = Arc::new(Provisioner::new(
        store,
        applier,
        releases,
        fetcher,
        ProvisionerConfig {
            flap_threshold: args.flap_threshold,
            reconciler: ReconcilerConfig {
                apply_timeout: Duration::from_secs(args.apply_timeout_secs),
                ..Default::default()
            },
        },
    ));

    let queue = Arc::new(WorkQueue::new());

    // Deployment events feed the queue directly
    {
        let queue = queue.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let mut deployments = Box::pin(watch_deployments(client));
            while let Some(key) = deployments.next().await {
                queue.enqueue(key);
            }
        });
    }

    // Drift watches on the workload kinds charts commonly produce
    let watched = [
        ApiResource::erase::<Deployment>(&()),
        ApiResource::erase::<Service>(&()),
        ApiResource::erase::<ConfigMap>(&()),
        ApiResource::erase::<Secret>(&()),
    ];
    for api_resource in watched {
        let queue = queue.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let events = Box::pin(watch_owned(client, api_resource));
            drift::pump(events, &queue).await;
        });
    }

    info!(workers = args.workers, "starting stevedore operator");
    let controller = Controller::new(
        provisioner,
        queue,
        ControllerConfig {
            workers: args.workers,
            backoff: Backoff::new(
                Duration::from_millis(args.backoff_base_ms),
                Duration::from_secs(args.backoff_max_secs),
            ),
            resync: Duration::from_secs(args.resync_secs),
            content_error_requeue: Duration::from_secs(args.content_error_requeue_secs),
        },
    );
    controller.run().await;

    Ok(())
}
