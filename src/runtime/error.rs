// ABOUTME: Runtime connection error types with SNAFU pattern.
// ABOUTME: Unifies Docker daemon and Kubernetes API connection failures.

use snafu::Snafu;

/// Unified error for establishing backend connections.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    #[snafu(display("cannot connect to Docker: {source}"))]
    DockerConnect { source: bollard::errors::Error },

    #[snafu(display("cannot load Kubernetes configuration: {source}"))]
    KubeConfig { source: kube::Error },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Docker socket missing or daemon not answering.
    Docker,
    /// No usable kubeconfig or in-cluster configuration.
    Kubernetes,
}

impl RuntimeError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            RuntimeError::DockerConnect { .. } => RuntimeErrorKind::Docker,
            RuntimeError::KubeConfig { .. } => RuntimeErrorKind::Kubernetes,
        }
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(source: bollard::errors::Error) -> Self {
        RuntimeError::DockerConnect { source }
    }
}

impl From<kube::Error> for RuntimeError {
    fn from(source: kube::Error) -> Self {
        RuntimeError::KubeConfig { source }
    }
}
