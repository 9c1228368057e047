// ABOUTME: Container operations trait for the Docker daemon.
// ABOUTME: Only what is needed to read files out of an image: create, copy out, remove.

use crate::types::{ContainerId, ImageId};
use async_trait::async_trait;

/// Throwaway-container operations.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    /// Create (but do not start) a container from an image.
    async fn create_container(&self, image: &ImageId) -> Result<ContainerId, ContainerError>;

    /// Force-remove a container.
    async fn remove_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    /// Copy a path out of a container, returned as a tar archive.
    async fn copy_from_container(
        &self,
        id: &ContainerId,
        path: &str,
    ) -> Result<Vec<u8>, ContainerError>;
}

/// Errors from container operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("path not found in container: {0}")]
    PathNotFound(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
