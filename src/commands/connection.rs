// ABOUTME: Shared helpers for connecting to the Docker daemon and the Kubernetes API.
// ABOUTME: Used by both up and down.

use kube_compose::cluster::KubeCluster;
use kube_compose::config::Config;
use kube_compose::error::Result;
use kube_compose::output::Output;
use kube_compose::runtime::{BollardRuntime, RuntimeError};

pub async fn connect_to_docker(output: &Output) -> Result<BollardRuntime> {
    output.info("  → Connecting to Docker...");
    let runtime = BollardRuntime::connect().map_err(RuntimeError::from)?;
    runtime.ping().await.map_err(RuntimeError::from)?;
    Ok(runtime)
}

pub async fn connect_to_cluster(config: &Config, output: &Output) -> Result<KubeCluster> {
    output.info(&format!(
        "  → Connecting to Kubernetes (namespace {})...",
        config.settings.namespace
    ));
    let cluster = KubeCluster::connect(config.settings.namespace.clone())
        .await
        .map_err(RuntimeError::from)?;
    Ok(cluster)
}
