// ABOUTME: kube-rs implementation of ClusterOps.
// ABOUTME: Namespaced Api handles for Pods and Services with error mapping.

use super::{ClusterError, ClusterOps, EventStream, LineStream, Listing};
use async_trait::async_trait;
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, WatchParams};

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_create_error(e: kube::Error, name: &str) -> ClusterError {
    match e {
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::AlreadyExists(name.to_string()),
        other => map_error(other),
    }
}

fn map_delete_error(e: kube::Error, name: &str) -> ClusterError {
    match e {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(name.to_string()),
        other => map_error(other),
    }
}

fn map_error(e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(resp) => ClusterError::Api {
            code: resp.code,
            message: resp.message,
        },
        other => ClusterError::Request(other.to_string()),
    }
}

fn object_name<K: kube::Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

// =============================================================================
// KubeCluster
// =============================================================================

/// Kubernetes API client scoped to one namespace.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using the local kubeconfig or the in-cluster environment.
    pub async fn connect(namespace: impl Into<String>) -> Result<Self, kube::Error> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn list_pods(&self, selector: &str) -> Result<Listing<Pod>, ClusterError> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(map_error)?;

        Ok(Listing {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch_pods(
        &self,
        selector: &str,
        resource_version: &str,
    ) -> Result<EventStream<Pod>, ClusterError> {
        let stream = self
            .pods()
            .watch(&WatchParams::default().labels(selector), resource_version)
            .await
            .map_err(map_error)?;

        Ok(stream.map_err(map_error).boxed())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let name = object_name(pod);
        self.pods()
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| map_create_error(e, &name))?;
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.pods()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_delete_error(e, name))?;
        Ok(())
    }

    async fn list_services(&self, selector: &str) -> Result<Listing<Service>, ClusterError> {
        let list = self
            .services()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(map_error)?;

        Ok(Listing {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch_services(
        &self,
        selector: &str,
        resource_version: &str,
    ) -> Result<EventStream<Service>, ClusterError> {
        let stream = self
            .services()
            .watch(&WatchParams::default().labels(selector), resource_version)
            .await
            .map_err(map_error)?;

        Ok(stream.map_err(map_error).boxed())
    }

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError> {
        let name = object_name(service);
        self.services()
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| map_create_error(e, &name))?;
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        self.services()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_delete_error(e, name))?;
        Ok(())
    }

    async fn pod_logs(&self, pod: &str, container: &str) -> Result<LineStream, ClusterError> {
        let params = LogParams {
            follow: true,
            container: Some(container.to_string()),
            ..Default::default()
        };

        let reader = self
            .pods()
            .log_stream(pod, &params)
            .await
            .map_err(map_error)?;

        Ok(reader
            .lines()
            .map_err(|e| ClusterError::Stream(e.to_string()))
            .boxed())
    }
}
