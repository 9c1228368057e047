// ABOUTME: Image operations trait for the Docker daemon.
// ABOUTME: List, inspect, pull, push, tag and build images.

use super::shared_types::{ImageDetails, LocalImage, TransferStream};
use crate::types::{ImageId, ImageRef};
use async_trait::async_trait;

/// Image operations used by the image pipeline.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// List local images, including their repo tags and repo digests.
    async fn list_images(&self) -> Result<Vec<LocalImage>, ImageError>;

    /// Inspect an image by ID or reference.
    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, ImageError>;

    /// Start pulling an image; the stream ends when the daemon closes the response.
    fn pull_image(&self, reference: &ImageRef) -> TransferStream;

    /// Start pushing a tagged image to its registry.
    fn push_image(&self, reference: &ImageRef) -> TransferStream;

    /// Add `target` as a tag of `source`.
    async fn tag_image(&self, source: &ImageId, target: &ImageRef) -> Result<(), ImageError>;

    /// Build an image from a tar build context containing a `Dockerfile`.
    async fn build_image(&self, context: Vec<u8>, tag: &ImageRef) -> Result<(), ImageError>;
}

/// Errors from image operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("push failed: {0}")]
    PushFailed(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
