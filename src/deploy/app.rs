// ABOUTME: App registry: one record per compose service being deployed.
// ABOUTME: Holds single-flight image and volume-init results and the Service's cluster IP.

use super::error::DeployError;
use super::manifest::object_name;
use crate::config::{Config, DependencyCondition, Healthcheck, Service};
use crate::types::{ImageId, ServiceName};
use nonempty::NonEmpty;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

type SharedResult<T> = Result<Arc<T>, Arc<DeployError>>;

/// Kubernetes image pull policy for a Pod container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

/// An image reference as a Pod should use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodImage {
    pub reference: String,
    pub pull_policy: PullPolicy,
}

/// Everything the image pipeline learns about an app's image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// The local image the pipeline resolved or pulled.
    pub source_id: ImageId,
    pub pod_image: PodImage,
    /// Entrypoint followed by arguments.
    pub command: NonEmpty<String>,
    pub healthcheck: Option<Healthcheck>,
    /// Numeric (uid, gid) when running as the image's user was requested.
    pub user: Option<(u32, u32)>,
    pub working_dir: Option<String>,
}

/// One compose service instance being deployed.
pub struct App {
    service: Service,
    object_name: String,
    image: OnceCell<SharedResult<ImageInfo>>,
    volume_init: OnceCell<SharedResult<PodImage>>,
    cluster_ip: Mutex<Option<String>>,
}

impl App {
    pub fn new(service: Service, environment_id: &str) -> Self {
        Self {
            object_name: object_name(&service.name, environment_id),
            service,
            image: OnceCell::new(),
            volume_init: OnceCell::new(),
            cluster_ip: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.service.name
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Pod and Service name: `<escaped service name>-<environment ID>`.
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn has_service(&self) -> bool {
        self.service.has_ports()
    }

    pub fn depends_on(&self) -> BTreeMap<String, DependencyCondition> {
        self.service
            .depends_on
            .iter()
            .map(|(dep, condition)| (dep.to_string(), *condition))
            .collect()
    }

    /// Compute the image info once; concurrent callers share the first result.
    pub async fn image_info<F, Fut>(&self, init: F) -> Result<Arc<ImageInfo>, DeployError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ImageInfo, DeployError>>,
    {
        single_flight(&self.image, init).await
    }

    /// Build the volume-init image once; concurrent callers share the first result.
    pub async fn volume_init_image<F, Fut>(&self, init: F) -> Result<Arc<PodImage>, DeployError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PodImage, DeployError>>,
    {
        single_flight(&self.volume_init, init).await
    }

    pub fn set_cluster_ip(&self, ip: impl Into<String>) {
        *self.cluster_ip.lock() = Some(ip.into());
    }

    pub fn cluster_ip(&self) -> Option<String> {
        self.cluster_ip.lock().clone()
    }
}

async fn single_flight<T, F, Fut>(
    cell: &OnceCell<SharedResult<T>>,
    init: F,
) -> Result<Arc<T>, DeployError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DeployError>>,
{
    cell.get_or_init(|| async { init().await.map(Arc::new).map_err(Arc::new) })
        .await
        .clone()
        .map_err(DeployError::Shared)
}

/// All apps of a run, keyed by service name.
pub struct AppRegistry {
    apps: BTreeMap<String, Arc<App>>,
}

impl AppRegistry {
    pub fn new(config: &Config, environment_id: &str) -> Self {
        let apps = config
            .services
            .values()
            .map(|service| {
                (
                    service.name.to_string(),
                    Arc::new(App::new(service.clone(), environment_id)),
                )
            })
            .collect();
        Self { apps }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<App>> {
        self.apps.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<App>> {
        self.apps.values()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// app -> (dependency -> condition), the scheduler's input.
    pub fn dependency_map(&self) -> BTreeMap<String, BTreeMap<String, DependencyCondition>> {
        self.apps
            .iter()
            .map(|(name, app)| (name.clone(), app.depends_on()))
            .collect()
    }

    /// Apps that get a Kubernetes Service.
    pub fn with_services(&self) -> impl Iterator<Item = &Arc<App>> {
        self.apps.values().filter(|app| app.has_service())
    }
}
