// ABOUTME: Shared types used across Docker trait definitions.
// ABOUTME: Local image listings, inspect results and pull/push progress messages.

use super::image::ImageError;
use crate::config::Healthcheck;
use crate::types::ImageId;
use futures::Stream;
use std::pin::Pin;

/// One entry of the daemon's image list.
#[derive(Debug, Clone)]
pub struct LocalImage {
    pub id: ImageId,
    /// e.g. `nginx:1.25`.
    pub repo_tags: Vec<String>,
    /// e.g. `nginx@sha256:...`.
    pub repo_digests: Vec<String>,
}

/// The parts of an image's config the pipeline needs.
#[derive(Debug, Clone, Default)]
pub struct ImageDetails {
    pub id: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    /// `None` when the image declares no healthcheck or disables it.
    pub healthcheck: Option<Healthcheck>,
}

/// One JSON message of a pull or push response stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferMessage {
    /// Layer ID for per-layer messages.
    pub id: Option<String>,
    pub status: Option<String>,
    pub current: Option<i64>,
    pub total: Option<i64>,
}

impl TransferMessage {
    pub fn layer(id: &str, status: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    pub fn status(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, current: i64, total: i64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }
}

pub type TransferStream =
    Pin<Box<dyn Stream<Item = Result<TransferMessage, ImageError>> + Send>>;
