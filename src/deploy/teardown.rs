// ABOUTME: Removes every Pod and Service of an environment.
// ABOUTME: Deletion is best effort; failures are collected instead of aborting.

use super::error::DeployError;
use super::manifest::Environment;
use crate::cluster::{ClusterError, ClusterOps};
use crate::diagnostics::Warning;

/// Kind of object a cleanup step touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Pod,
    Service,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Pod => write!(f, "pod"),
            ObjectKind::Service => write!(f, "service"),
        }
    }
}

/// An object that could not be deleted.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    pub kind: ObjectKind,
    pub name: String,
    pub error: String,
}

impl CleanupFailure {
    pub fn to_warning(&self) -> Warning {
        Warning::cleanup(format!("{} {}: {}", self.kind, self.name, self.error))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    pub deleted_pods: Vec<String>,
    pub deleted_services: Vec<String>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, kind: ObjectKind, name: String, result: Result<(), ClusterError>) {
        match result {
            // Gone already is as good as deleted.
            Ok(()) | Err(ClusterError::NotFound(_)) => match kind {
                ObjectKind::Pod => self.deleted_pods.push(name),
                ObjectKind::Service => self.deleted_services.push(name),
            },
            Err(e) => self.failures.push(CleanupFailure {
                kind,
                name,
                error: e.to_string(),
            }),
        }
    }
}

/// Delete the environment's Pods, then its Services.
///
/// # Errors
///
/// Only listing failures are fatal; individual deletions are reported in the result.
pub async fn teardown(
    cluster: &dyn ClusterOps,
    environment: &Environment,
) -> Result<CleanupResult, DeployError> {
    let selector = environment.selector();
    let mut result = CleanupResult::default();

    let pods = cluster.list_pods(&selector).await?;
    for name in pods.items.into_iter().filter_map(|p| p.metadata.name) {
        let deleted = cluster.delete_pod(&name).await;
        result.record(ObjectKind::Pod, name, deleted);
    }

    let services = cluster.list_services(&selector).await?;
    for name in services.items.into_iter().filter_map(|s| s.metadata.name) {
        let deleted = cluster.delete_service(&name).await;
        result.record(ObjectKind::Service, name, deleted);
    }

    tracing::info!(
        pods = result.deleted_pods.len(),
        services = result.deleted_services.len(),
        failures = result.failures.len(),
        "environment torn down"
    );
    Ok(result)
}
