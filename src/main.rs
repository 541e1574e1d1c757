//! Paddock operator - self-hosted CI runner pool management

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paddock::controller::Context;
use paddock::crd::RunnerPool;
use paddock::{queue, FIELD_MANAGER, POOL_LABEL, QUEUE_CAPACITY, RESYNC_PERIOD};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Paddock controller starting...");

    // Create Kubernetes client; nothing works without it
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRD on startup so the schema always matches
    // the operator version
    ensure_crd_installed(&client).await?;

    let pools: Api<RunnerPool> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());

    let (pool_store, pool_writer) = reflector::store();
    let (pod_store, pod_writer) = reflector::store();

    // Pool events feed the queue; the pod watch only keeps the index warm.
    // Every pod the provisioner creates carries the pool label, so the index
    // watches only those.
    let pool_stream =
        reflector(pool_writer, watcher(pools, watcher::Config::default())).default_backoff();
    let pod_stream = reflector(
        pod_writer,
        watcher(pods, watcher::Config::default().labels(POOL_LABEL)),
    )
    .default_backoff();

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    tokio::spawn(queue::run_pool_watch(pool_stream, tx.clone()));
    tokio::spawn(queue::run_pod_watch(pod_stream));
    tokio::spawn(queue::run_resync(
        pool_store.clone(),
        tx.clone(),
        RESYNC_PERIOD,
    ));

    // Reconciling against a partially-filled pod index would under-count
    // owned pods and over-provision, so block until both initial listings
    // have landed.
    tracing::info!("Waiting for initial watch sync...");
    pool_store
        .wait_until_ready()
        .await
        .map_err(|e| anyhow::anyhow!("RunnerPool watch ended before sync: {}", e))?;
    pod_store
        .wait_until_ready()
        .await
        .map_err(|e| anyhow::anyhow!("Pod watch ended before sync: {}", e))?;
    tracing::info!("Watches synced, starting reconcile worker");

    let ctx = Arc::new(Context::builder(client, pod_store).build());

    // Runs for process lifetime; shutdown is the orchestrator stopping the
    // container, and every reconcile is re-derivable from current state.
    queue::ReconcileWorker::new(rx, tx, ctx, pool_store).run().await;

    Ok(())
}

/// Ensure the RunnerPool CRD is installed
///
/// Uses server-side apply so upgrades converge on the current schema.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing RunnerPool CRD...");
    crds.patch(
        "runnerpools.paddock.dev",
        &params,
        &Patch::Apply(&RunnerPool::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install RunnerPool CRD: {}", e))?;

    Ok(())
}
