// ABOUTME: Bollard-based Docker daemon implementation.
// ABOUTME: Maps image and container operations onto the Docker Engine API.

use crate::config::from_image_config;
use crate::runtime::traits::{
    ContainerError, ContainerOps, ImageDetails, ImageError, ImageOps, LocalImage,
    TransferMessage, TransferStream,
};
use crate::types::{ContainerId, ImageId, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, CreateImageOptions, DownloadFromContainerOptions,
    ListImagesOptions, PushImageOptions, RemoveContainerOptions, TagImageOptions,
};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{Either, Full};

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_image_pull_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    ImageError::PullFailed(format!("{}: {}", image_name, e))
}

fn map_image_push_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    ImageError::PushFailed(format!("{}: {}", image_name, e))
}

fn map_image_not_found_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 404 =>
        {
            ImageError::NotFound(image_name.to_string())
        }
        _ => ImageError::Runtime(format!("{}: {}", image_name, e)),
    }
}

fn map_container_create_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::ImageNotFound(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_not_found_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_copy_error(e: bollard::errors::Error, path: &str) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 404 =>
        {
            ContainerError::PathNotFound(path.to_string())
        }
        _ => ContainerError::Runtime(e.to_string()),
    }
}

// =============================================================================
// BollardRuntime
// =============================================================================

/// Docker daemon client.
pub struct BollardRuntime {
    client: Docker,
}

impl BollardRuntime {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, bollard::errors::Error> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(Self::new(client))
    }

    /// Check the daemon answers before doing any real work.
    pub async fn ping(&self) -> Result<(), bollard::errors::Error> {
        self.client.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl ImageOps for BollardRuntime {
    async fn list_images(&self) -> Result<Vec<LocalImage>, ImageError> {
        let images = self
            .client
            .list_images(Some(ListImagesOptions {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| ImageError::Runtime(format!("failed to list images: {}", e)))?;

        Ok(images
            .into_iter()
            .map(|summary| LocalImage {
                id: ImageId::new(summary.id),
                repo_tags: summary.repo_tags,
                repo_digests: summary.repo_digests,
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, ImageError> {
        let inspect = self
            .client
            .inspect_image(reference)
            .await
            .map_err(|e| map_image_not_found_error(e, reference))?;

        let config = inspect.config.unwrap_or_default();

        let healthcheck = match config.healthcheck {
            Some(hc) => from_image_config(
                &hc.test.unwrap_or_default(),
                hc.interval,
                hc.timeout,
                hc.retries,
                hc.start_period,
            )
            .map_err(|e| ImageError::Runtime(format!("{}: healthcheck: {}", reference, e)))?,
            None => None,
        };

        Ok(ImageDetails {
            id: inspect.id.unwrap_or_default(),
            entrypoint: config.entrypoint.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
            user: config.user.filter(|u| !u.is_empty()),
            working_dir: config.working_dir.filter(|w| !w.is_empty()),
            healthcheck,
        })
    }

    fn pull_image(&self, reference: &ImageRef) -> TransferStream {
        let image_name = reference.to_string();
        let opts = CreateImageOptions {
            from_image: Some(image_name.clone()),
            ..Default::default()
        };

        let stream = self
            .client
            .create_image(Some(opts), None, None)
            .map(move |result| {
                result
                    .map(|info| TransferMessage {
                        id: info.id,
                        status: info.status,
                        current: info.progress_detail.as_ref().and_then(|p| p.current),
                        total: info.progress_detail.as_ref().and_then(|p| p.total),
                    })
                    .map_err(|e| map_image_pull_error(e, &image_name))
            });

        Box::pin(stream)
    }

    fn push_image(&self, reference: &ImageRef) -> TransferStream {
        let image_name = reference.to_string();
        let repository = match reference.registry() {
            Some(registry) => format!("{}/{}", registry, reference.name()),
            None => reference.name().to_string(),
        };
        let opts = PushImageOptions {
            tag: reference.tag().map(str::to_string),
            ..Default::default()
        };

        // The push response model carries no layer ID, so pushes report
        // aggregate status only.
        let stream = self
            .client
            .push_image(&repository, Some(opts), None)
            .map(move |result| {
                result
                    .map(|info| TransferMessage {
                        id: None,
                        status: info.status,
                        current: info.progress_detail.as_ref().and_then(|p| p.current),
                        total: info.progress_detail.as_ref().and_then(|p| p.total),
                    })
                    .map_err(|e| map_image_push_error(e, &image_name))
            });

        Box::pin(stream)
    }

    async fn tag_image(&self, source: &ImageId, target: &ImageRef) -> Result<(), ImageError> {
        let repository = match target.registry() {
            Some(registry) => format!("{}/{}", registry, target.name()),
            None => target.name().to_string(),
        };
        let opts = TagImageOptions {
            repo: Some(repository),
            tag: target.tag().map(str::to_string),
        };

        self.client
            .tag_image(source.as_str(), Some(opts))
            .await
            .map_err(|e| map_image_not_found_error(e, source.as_str()))
    }

    async fn build_image(&self, context: Vec<u8>, tag: &ImageRef) -> Result<(), ImageError> {
        let image_name = tag.to_string();
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: Some(image_name.clone()),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let body = Either::Left(Full::new(Bytes::from(context)));
        let mut build_stream = self.client.build_image(options, None, Some(body));

        while let Some(result) = build_stream.next().await {
            let output =
                result.map_err(|e| ImageError::BuildFailed(format!("{}: {}", image_name, e)))?;
            if let Some(error_detail) = output.error_detail {
                return Err(ImageError::BuildFailed(format!(
                    "{}: {}",
                    image_name,
                    error_detail.message.unwrap_or_default()
                )));
            }
            if let Some(line) = output.stream {
                tracing::trace!(image = %image_name, "{}", line.trim_end());
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn create_container(&self, image: &ImageId) -> Result<ContainerId, ContainerError> {
        let body = ContainerCreateBody {
            image: Some(image.as_str().to_string()),
            // Never started; the command only has to exist.
            cmd: Some(vec!["true".to_string()]),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(map_container_create_error)?;

        Ok(ContainerId::new(response.id))
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_not_found_error)
    }

    async fn copy_from_container(
        &self,
        id: &ContainerId,
        path: &str,
    ) -> Result<Vec<u8>, ContainerError> {
        let opts = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        let mut stream = self.client.download_from_container(id.as_str(), Some(opts));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive.extend_from_slice(&chunk.map_err(|e| map_copy_error(e, path))?);
        }
        Ok(archive)
    }
}
