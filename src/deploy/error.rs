// ABOUTME: Error types for deployment operations.
// ABOUTME: Covers configuration, Docker, cluster, external modification and container failures.

use crate::cluster::ClusterError;
use crate::runtime::{ContainerError, ImageError};
use std::fmt;
use std::sync::Arc;

/// Errors that end a deployment run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Configuration that cannot be deployed as written.
    #[error("configuration error: {0}")]
    Config(String),

    /// Neither the service nor its image define a command.
    #[error("service {0} has no command: set `command` or `entrypoint`, or use an image with a default command")]
    MissingCommand(String),

    /// A bare image ID that the local daemon does not know.
    #[error("image {0} not found locally and cannot be pulled by ID")]
    ImageNotFound(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// A pull or push stream ended without reporting a digest.
    #[error("unknown error transferring {0}: stream ended without a digest")]
    TransferIncomplete(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A watch produced an event the loop cannot interpret.
    #[error("unexpected watch event: {0}")]
    UnexpectedEvent(String),

    /// A watch stream closed before convergence.
    #[error("watch on {0} closed unexpectedly")]
    WatchClosed(&'static str),

    /// Objects this run created were deleted or changed behind its back.
    #[error("resources were modified externally: {0}")]
    ExternallyModified(String),

    #[error(transparent)]
    ContainerFailed(ContainerFailure),

    /// The kubelet could not pull a Pod's image.
    #[error("pod {pod} cannot pull the image of container {container}: {message}")]
    ErrImagePull {
        pod: String,
        container: String,
        message: String,
    },

    /// Reading bind-mount data or writing a build context failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("deployment cancelled")]
    Cancelled,

    /// A background preparation task panicked.
    #[error("background task panicked: {0}")]
    TaskPanicked(String),

    /// A single-flight failure observed by more than one caller.
    #[error(transparent)]
    Shared(Arc<DeployError>),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Configuration,
    Cluster,
    Docker,
    ExternallyModified,
    ContainerFailure,
    Cancelled,
    Internal,
}

impl DeployError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Config(_)
            | DeployError::MissingCommand(_)
            | DeployError::ImageNotFound(_)
            | DeployError::Io(_) => DeployErrorKind::Configuration,
            DeployError::Image(_)
            | DeployError::Container(_)
            | DeployError::TransferIncomplete(_) => DeployErrorKind::Docker,
            DeployError::Cluster(_)
            | DeployError::UnexpectedEvent(_)
            | DeployError::WatchClosed(_) => DeployErrorKind::Cluster,
            DeployError::ExternallyModified(_) => DeployErrorKind::ExternallyModified,
            DeployError::ContainerFailed(_) | DeployError::ErrImagePull { .. } => {
                DeployErrorKind::ContainerFailure
            }
            DeployError::Cancelled => DeployErrorKind::Cancelled,
            DeployError::TaskPanicked(_) => DeployErrorKind::Internal,
            DeployError::Shared(inner) => inner.kind(),
        }
    }

    /// The container failure behind this error, if any.
    pub fn container_failure(&self) -> Option<&ContainerFailure> {
        match self {
            DeployError::ContainerFailed(failure) => Some(failure),
            DeployError::Shared(inner) => inner.container_failure(),
            _ => None,
        }
    }
}

/// A container that terminated with a reason other than "Completed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFailure {
    pub pod: String,
    pub container: String,
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl fmt::Display for ContainerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "container {} of pod {} terminated with exit code {}",
            self.container, self.pod, self.exit_code
        )?;
        if let Some(signal) = self.signal {
            write!(f, " (signal {})", signal)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ", reason {}", reason)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ContainerFailure {}
