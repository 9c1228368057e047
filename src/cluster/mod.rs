// ABOUTME: Kubernetes access for the orchestrator.
// ABOUTME: ClusterOps trait over Pods, Services and Pod logs, plus the kube-rs client.

mod kube_client;

pub use kube_client::KubeCluster;

use async_trait::async_trait;
use futures::Stream;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::WatchEvent;
use std::pin::Pin;

/// A list result and the resource version to watch from.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

pub type EventStream<K> = Pin<Box<dyn Stream<Item = Result<WatchEvent<K>, ClusterError>> + Send>>;

pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, ClusterError>> + Send>>;

/// Namespaced Pod and Service operations, always filtered by a label selector.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn list_pods(&self, selector: &str) -> Result<Listing<Pod>, ClusterError>;

    async fn watch_pods(
        &self,
        selector: &str,
        resource_version: &str,
    ) -> Result<EventStream<Pod>, ClusterError>;

    /// Fails with `ClusterError::AlreadyExists` when the name is taken.
    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError>;

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError>;

    async fn list_services(&self, selector: &str) -> Result<Listing<Service>, ClusterError>;

    async fn watch_services(
        &self,
        selector: &str,
        resource_version: &str,
    ) -> Result<EventStream<Service>, ClusterError>;

    /// Fails with `ClusterError::AlreadyExists` when the name is taken.
    async fn create_service(&self, service: &Service) -> Result<(), ClusterError>;

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError>;

    /// Follow a container's output line by line.
    async fn pod_logs(&self, pod: &str, container: &str) -> Result<LineStream, ClusterError>;
}

/// Errors from Kubernetes operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Kubernetes request failed: {0}")]
    Request(String),

    #[error("log stream failed: {0}")]
    Stream(String),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}
