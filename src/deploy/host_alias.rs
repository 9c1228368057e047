// ABOUTME: Creates every app's Service up front and waits for their cluster IPs.
// ABOUTME: The resulting host aliases let Pods resolve compose service names.

use super::app::AppRegistry;
use super::cancellable;
use super::error::DeployError;
use super::manifest::{Environment, service_of};
use crate::cluster::ClusterOps;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::api::WatchEvent;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

const CLUSTER_IP_TYPE: &str = "ClusterIP";

/// An `/etc/hosts` entry injected into every Pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostAlias {
    pub ip: String,
    pub hostnames: Vec<String>,
}

/// Single-flight Service creation for one run.
pub struct HostAliasCoordinator {
    cluster: Arc<dyn ClusterOps>,
    environment: Environment,
    cancel: CancellationToken,
    aliases: OnceCell<Result<Arc<Vec<HostAlias>>, Arc<DeployError>>>,
}

impl HostAliasCoordinator {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        environment: Environment,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            environment,
            cancel,
            aliases: OnceCell::new(),
        }
    }

    /// Create the Services and return host aliases once every cluster IP is known.
    ///
    /// Concurrent callers share one run of the work and its result.
    pub async fn host_aliases(
        &self,
        registry: &AppRegistry,
    ) -> Result<Arc<Vec<HostAlias>>, DeployError> {
        self.aliases
            .get_or_init(|| async {
                self.create_services_and_wait(registry)
                    .await
                    .map(Arc::new)
                    .map_err(Arc::new)
            })
            .await
            .clone()
            .map_err(DeployError::Shared)
    }

    async fn create_services_and_wait(
        &self,
        registry: &AppRegistry,
    ) -> Result<Vec<HostAlias>, DeployError> {
        let expected: BTreeSet<String> = registry
            .with_services()
            .map(|app| app.name().to_string())
            .collect();
        if expected.is_empty() {
            return Ok(Vec::new());
        }

        for app in registry.with_services() {
            let service = self.environment.service(app)?;
            match cancellable(&self.cancel, self.cluster.create_service(&service)).await {
                Ok(()) => tracing::info!(app = %app.name(), service = app.object_name(), "created service"),
                Err(DeployError::Cluster(e)) if e.is_already_exists() => {
                    tracing::debug!(service = app.object_name(), "service already exists")
                }
                Err(e) => return Err(e),
            }
        }

        let selector = self.environment.selector();
        let listing = cancellable(&self.cancel, self.cluster.list_services(&selector)).await?;

        let mut ips = BTreeMap::new();
        let mut listed = 0;
        for service in &listing.items {
            if let Some(name) = tracked_name(service, &expected) {
                listed += 1;
                record(service, name, &mut ips)?;
            }
        }
        if listed < expected.len() {
            return Err(DeployError::ExternallyModified(format!(
                "listed {} of {} services created for this environment",
                listed,
                expected.len()
            )));
        }

        if ips.len() < expected.len() {
            let mut events = cancellable(
                &self.cancel,
                self.cluster
                    .watch_services(&selector, &listing.resource_version),
            )
            .await?;

            while ips.len() < expected.len() {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
                    event = events.next() => event,
                };
                match event {
                    None => return Err(DeployError::WatchClosed("services")),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(WatchEvent::Added(service) | WatchEvent::Modified(service))) => {
                        if let Some(name) = tracked_name(&service, &expected) {
                            record(&service, name, &mut ips)?;
                        }
                    }
                    Some(Ok(WatchEvent::Deleted(service))) => {
                        if let Some(name) = tracked_name(&service, &expected) {
                            return Err(DeployError::ExternallyModified(format!(
                                "service of {} was deleted",
                                name
                            )));
                        }
                    }
                    Some(Ok(WatchEvent::Bookmark(_))) => {}
                    Some(Ok(WatchEvent::Error(e))) => {
                        return Err(DeployError::UnexpectedEvent(e.message));
                    }
                }
            }
        }

        let mut aliases = Vec::new();
        for (name, ip) in ips {
            let Some(app) = registry.get(&name) else {
                continue;
            };
            app.set_cluster_ip(ip.clone());
            aliases.push(HostAlias {
                ip,
                hostnames: app.name().host_names(),
            });
        }
        tracing::debug!(count = aliases.len(), "all service cluster IPs known");
        Ok(aliases)
    }
}

fn tracked_name<'a>(service: &'a Service, expected: &BTreeSet<String>) -> Option<&'a str> {
    service_of(&service.metadata).filter(|name| expected.contains(*name))
}

/// Check the Service is still ours to use and note its IP once assigned.
fn record(
    service: &Service,
    name: &str,
    ips: &mut BTreeMap<String, String>,
) -> Result<(), DeployError> {
    let spec = service.spec.as_ref();
    let service_type = spec
        .and_then(|s| s.type_.as_deref())
        .unwrap_or(CLUSTER_IP_TYPE);
    if service_type != CLUSTER_IP_TYPE {
        return Err(DeployError::ExternallyModified(format!(
            "service of {} changed type to {}",
            name, service_type
        )));
    }
    if let Some(ip) = spec
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
    {
        ips.insert(name.to_string(), ip.to_string());
    }
    Ok(())
}
