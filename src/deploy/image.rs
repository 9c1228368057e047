// ABOUTME: Image pipeline: resolves, pulls and distributes each app's image to the cluster.
// ABOUTME: Also derives the Pod command, readiness probe and user, and builds volume-init images.

use super::app::{App, ImageInfo, PodImage, PullPolicy};
use super::cancellable;
use super::error::DeployError;
use super::fs::Filesystem;
use super::progress::{TransferProgress, await_transfer};
use super::user::resolve_user;
use super::volume_init::build_context;
use crate::config::{HealthcheckOverride, ImageStorage, Service, Settings, UserSpec};
use crate::diagnostics::Diagnostics;
use crate::output::Reporter;
use crate::runtime::{DockerOps, ImageDetails, LocalImage};
use crate::types::{ImageId, ImageRef, ImageSource};
use nonempty::NonEmpty;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

const PULLING: &str = "pulling";
const PUSHING: &str = "pushing";
const INIT_SUFFIX: &str = "-init";

/// Everything the pipeline needs for one run.
pub struct ImagePipeline {
    docker: Arc<dyn DockerOps>,
    fs: Arc<dyn Filesystem>,
    reporter: Arc<dyn Reporter>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    settings: Settings,
    environment_id: String,
    cancel: CancellationToken,
    local_images: OnceCell<Result<Arc<Vec<LocalImage>>, Arc<DeployError>>>,
}

impl ImagePipeline {
    pub fn new(
        docker: Arc<dyn DockerOps>,
        fs: Arc<dyn Filesystem>,
        reporter: Arc<dyn Reporter>,
        diagnostics: Arc<Mutex<Diagnostics>>,
        settings: Settings,
        environment_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            docker,
            fs,
            reporter,
            diagnostics,
            settings,
            environment_id: environment_id.into(),
            cancel,
            local_images: OnceCell::new(),
        }
    }

    /// The app's image info, computed at most once per run.
    pub async fn image_info(&self, app: &App) -> Result<Arc<ImageInfo>, DeployError> {
        app.image_info(|| self.prepare(app)).await
    }

    /// The app's volume-init image, or `None` when no bind mounts are emulated.
    pub async fn volume_init_image(&self, app: &App) -> Result<Option<Arc<PodImage>>, DeployError> {
        if !self.needs_volume_init(app) {
            return Ok(None);
        }
        app.volume_init_image(|| self.build_volume_init(app))
            .await
            .map(Some)
    }

    pub fn needs_volume_init(&self, app: &App) -> bool {
        self.settings.bind_mount_emulation && !app.service().volumes.is_empty()
    }

    async fn prepare(&self, app: &App) -> Result<ImageInfo, DeployError> {
        let service = app.service();
        let source_id = self.resolve_source(app).await?;
        let details = cancellable(&self.cancel, self.docker.inspect_image(source_id.as_str())).await?;

        let healthcheck = match &service.healthcheck {
            HealthcheckOverride::Explicit(healthcheck) => Some(healthcheck.clone()),
            HealthcheckOverride::Disabled => None,
            HealthcheckOverride::Inherit => details.healthcheck.clone(),
        };
        let command = pod_command(service, &details)?;

        let user = if self.settings.run_as_user {
            Some(self.resolve_user(service, &details, &source_id).await?)
        } else {
            None
        };

        let pod_image = self.distribute(app, &source_id).await?;
        tracing::info!(app = %app.name(), image = %pod_image.reference, "image ready");

        Ok(ImageInfo {
            source_id,
            pod_image,
            command,
            healthcheck,
            user,
            working_dir: details.working_dir.clone().filter(|dir| !dir.is_empty()),
        })
    }

    /// Find the app's image locally, pulling it when it is missing.
    async fn resolve_source(&self, app: &App) -> Result<ImageId, DeployError> {
        let images = self.local_images().await?;
        let reference = match &app.service().image {
            ImageSource::Id(id) => {
                return images
                    .iter()
                    .find(|image| image.id.matches(id))
                    .map(|image| image.id.clone())
                    .ok_or_else(|| DeployError::ImageNotFound(id.clone()));
            }
            ImageSource::Named(reference) => reference,
        };

        if let Some(id) = find_named(&images, reference) {
            tracing::debug!(app = %app.name(), image = %reference, id = %id, "image present locally");
            return Ok(id);
        }

        tracing::info!(app = %app.name(), image = %reference, "pulling image");
        let name = app.name().to_string();
        let digest = await_transfer(
            self.docker.pull_image(reference),
            TransferProgress::pull(),
            &reference.to_string(),
            &self.cancel,
            |fraction| self.reporter.progress(&name, PULLING, fraction),
        )
        .await?;

        let images = cancellable(&self.cancel, self.docker.list_images()).await?;
        images
            .iter()
            .find(|image| {
                image
                    .repo_digests
                    .iter()
                    .any(|d| reference.matches_repo_digest(d, &digest))
            })
            .map(|image| image.id.clone())
            .ok_or_else(|| DeployError::ImageNotFound(format!("{}@{}", reference.repository(), digest)))
    }

    /// The daemon's image list, fetched once per run.
    async fn local_images(&self) -> Result<Arc<Vec<LocalImage>>, DeployError> {
        self.local_images
            .get_or_init(|| async {
                cancellable(&self.cancel, self.docker.list_images())
                    .await
                    .map(Arc::new)
                    .map_err(Arc::new)
            })
            .await
            .clone()
            .map_err(DeployError::Shared)
    }

    /// Make the image reachable from the cluster.
    async fn distribute(&self, app: &App, source: &ImageId) -> Result<PodImage, DeployError> {
        let escaped = app.name().escaped();
        match &self.settings.cluster_image_storage {
            Some(ImageStorage::Docker) => {
                let target = self.local_ref(&escaped)?;
                cancellable(&self.cancel, self.docker.tag_image(source, &target)).await?;
                Ok(PodImage {
                    reference: target.to_string(),
                    pull_policy: PullPolicy::Never,
                })
            }
            Some(ImageStorage::DockerRegistry { host }) => {
                let target = self.registry_ref(host, &escaped)?;
                cancellable(&self.cancel, self.docker.tag_image(source, &target)).await?;
                self.push(app, &target).await
            }
            None => match &app.service().image {
                ImageSource::Named(reference) => Ok(PodImage {
                    reference: reference.to_string(),
                    pull_policy: PullPolicy::IfNotPresent,
                }),
                ImageSource::Id(id) => Err(DeployError::Config(format!(
                    "service {} uses local image {}; set cluster_image_storage to deploy it",
                    app.name(),
                    id
                ))),
            },
        }
    }

    async fn push(&self, app: &App, target: &ImageRef) -> Result<PodImage, DeployError> {
        tracing::info!(app = %app.name(), image = %target, "pushing image");
        let name = app.name().to_string();
        let digest = await_transfer(
            self.docker.push_image(target),
            TransferProgress::push(),
            &target.to_string(),
            &self.cancel,
            |fraction| self.reporter.progress(&name, PUSHING, fraction),
        )
        .await?;
        Ok(PodImage {
            reference: target.with_digest(&digest).to_string(),
            pull_policy: PullPolicy::Always,
        })
    }

    async fn resolve_user(
        &self,
        service: &Service,
        details: &ImageDetails,
        image: &ImageId,
    ) -> Result<(u32, u32), DeployError> {
        let spec = match (&service.user, details.user.as_deref()) {
            (Some(spec), _) => spec.clone(),
            (None, Some(user)) if !user.is_empty() => {
                UserSpec::parse(user).map_err(|e| {
                    DeployError::Config(format!("image of {} has user {}: {}", service.name, user, e))
                })?
            }
            (None, _) => return Ok((0, 0)),
        };
        let docker = self.docker.clone();
        let diagnostics = self.diagnostics.clone();
        cancellable(&self.cancel, resolve_user(docker, diagnostics, image, &spec)).await
    }

    async fn build_volume_init(&self, app: &App) -> Result<PodImage, DeployError> {
        let Some(storage) = self.settings.cluster_image_storage.clone() else {
            return Err(DeployError::Config(format!(
                "service {} has bind mounts; set cluster_image_storage or disable bind_mount_emulation",
                app.name()
            )));
        };

        let fs = self.fs.clone();
        let mounts = app.service().volumes.clone();
        let base = self.settings.volume_init_base_image.clone();
        let context = tokio::task::spawn_blocking(move || build_context(fs.as_ref(), &mounts, &base))
            .await
            .map_err(std::io::Error::other)??;
        self.diagnostics.lock().extend(context.warnings);

        let name = format!("{}{}", app.name().escaped(), INIT_SUFFIX);
        let target = match &storage {
            ImageStorage::Docker => self.local_ref(&name)?,
            ImageStorage::DockerRegistry { host } => self.registry_ref(host, &name)?,
        };

        tracing::info!(app = %app.name(), image = %target, "building volume-init image");
        cancellable(&self.cancel, self.docker.build_image(context.archive, &target))
            .await?;

        match storage {
            ImageStorage::Docker => Ok(PodImage {
                reference: target.to_string(),
                pull_policy: PullPolicy::Never,
            }),
            ImageStorage::DockerRegistry { .. } => self.push(app, &target).await,
        }
    }

    /// `<name>:<environment ID>` in the local daemon.
    fn local_ref(&self, name: &str) -> Result<ImageRef, DeployError> {
        ImageRef::new(None, name, &self.environment_id)
            .map_err(|e| DeployError::Config(format!("image name {}: {}", name, e)))
    }

    /// `<host>/<namespace>/<name>:<environment ID>`.
    fn registry_ref(&self, host: &str, name: &str) -> Result<ImageRef, DeployError> {
        let path = format!("{}/{}", self.settings.namespace, name);
        ImageRef::new(Some(host), &path, &self.environment_id)
            .map_err(|e| DeployError::Config(format!("image name {}/{}: {}", host, path, e)))
    }
}

/// The local image a named reference points at, by digest when pinned.
fn find_named(images: &[LocalImage], reference: &ImageRef) -> Option<ImageId> {
    images
        .iter()
        .find(|image| match reference.digest() {
            Some(digest) => image
                .repo_digests
                .iter()
                .any(|d| reference.matches_repo_digest(d, digest)),
            None => image.repo_tags.iter().any(|t| reference.matches_repo_tag(t)),
        })
        .map(|image| image.id.clone())
}

/// Entrypoint followed by arguments.
///
/// Overriding the entrypoint drops the image's default arguments, as Docker does.
fn pod_command(service: &Service, details: &ImageDetails) -> Result<NonEmpty<String>, DeployError> {
    let entrypoint = service
        .entrypoint
        .clone()
        .unwrap_or_else(|| details.entrypoint.clone());
    let args = match (&service.command, &service.entrypoint) {
        (Some(command), _) => command.clone(),
        (None, Some(_)) => Vec::new(),
        (None, None) => details.cmd.clone(),
    };
    NonEmpty::from_vec(entrypoint.into_iter().chain(args).collect())
        .ok_or_else(|| DeployError::MissingCommand(service.name.to_string()))
}
