// ABOUTME: Application-wide error types for kube-compose.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no compose file found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no such service: {0}")]
    UnknownService(String),

    #[error("depends_on cycle between services: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("no environment ID set (use --env-id, KUBECOMPOSE_ENVID or x-kube-compose.environment_id)")]
    MissingEnvironmentId,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
