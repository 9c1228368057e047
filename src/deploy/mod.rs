// ABOUTME: Deployment orchestration: image pipeline, host aliases, scheduling and convergence.
// ABOUTME: Exports the orchestrator, teardown and the status and error types they report.

mod app;
mod convergence;
mod error;
pub mod fs;
mod host_alias;
mod image;
mod logs;
pub mod manifest;
pub mod progress;
mod scheduler;
mod status;
mod teardown;
pub mod user;
pub mod volume_init;

pub use app::{App, AppRegistry, ImageInfo, PodImage, PullPolicy};
pub use convergence::{Backends, Orchestrator, RunOptions, RunSummary};
pub use error::{ContainerFailure, DeployError, DeployErrorKind};
pub use host_alias::{HostAlias, HostAliasCoordinator};
pub use image::ImagePipeline;
pub use logs::LogSupervisor;
pub use manifest::Environment;
pub use scheduler::Scheduler;
pub use status::{AppStatus, observe_pod, running_containers};
pub use teardown::{CleanupFailure, CleanupResult, ObjectKind, teardown};

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race `fut` against cancellation of the run.
pub(crate) async fn cancellable<T, E>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, DeployError>
where
    DeployError: From<E>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(DeployError::Cancelled),
        result = fut => result.map_err(DeployError::from),
    }
}
