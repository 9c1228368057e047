// ABOUTME: App status state machine driven by observed Pod status.
// ABOUTME: Status only moves forward: Other < Started < Ready < Completed.

use super::error::{ContainerFailure, DeployError};
use crate::config::DependencyCondition;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use serde::Serialize;
use std::fmt;

const COMPLETED_REASON: &str = "Completed";
const ERR_IMAGE_PULL_REASON: &str = "ErrImagePull";

/// Observed progress of an app. The derived order is the state machine order,
/// and updates always keep the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    #[default]
    Other,
    /// Every container is running.
    Started,
    /// The Pod's Ready condition is true.
    Ready,
    /// A container ran to completion.
    Completed,
}

impl AppStatus {
    /// Whether a dependent waiting for `condition` may start.
    ///
    /// A completed app satisfies both conditions: it ran and exited cleanly,
    /// and nothing it did will change anymore.
    pub fn satisfies(self, condition: DependencyCondition) -> bool {
        match condition {
            DependencyCondition::Started => self >= AppStatus::Started,
            DependencyCondition::Healthy => self >= AppStatus::Ready,
        }
    }

    /// Whether the app needs no further observation.
    pub fn is_converged(self) -> bool {
        self >= AppStatus::Ready
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Other => "pending",
            AppStatus::Started => "started",
            AppStatus::Ready => "ready",
            AppStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the status a Pod currently shows.
///
/// Returns `AppStatus::Other` when nothing conclusive is visible yet; callers
/// merge the result with the previous status so `Other` never regresses it.
///
/// # Errors
///
/// `DeployError::ContainerFailed` when any container (init containers
/// included) terminated with a reason other than "Completed", and
/// `DeployError::ErrImagePull` when the kubelet cannot pull an image.
pub fn observe_pod(pod: &Pod) -> Result<AppStatus, DeployError> {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let Some(status) = &pod.status else {
        return Ok(AppStatus::Other);
    };

    let is_ready = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    if is_ready {
        return Ok(AppStatus::Ready);
    }

    let init = status.init_container_statuses.iter().flatten();
    let main = status.container_statuses.iter().flatten();
    let all: Vec<&ContainerStatus> = init.chain(main).collect();

    for container in &all {
        let Some(terminated) = container.state.as_ref().and_then(|s| s.terminated.as_ref())
        else {
            continue;
        };
        if terminated.reason.as_deref() != Some(COMPLETED_REASON) {
            return Err(DeployError::ContainerFailed(ContainerFailure {
                pod: pod_name,
                container: container.name.clone(),
                exit_code: terminated.exit_code,
                signal: terminated.signal,
                reason: terminated.reason.clone(),
                message: terminated.message.clone(),
            }));
        }
    }

    // A finished init container is expected; only the main containers count.
    let main_completed = status
        .container_statuses
        .iter()
        .flatten()
        .any(|c| is_terminated_with(c, COMPLETED_REASON));
    if main_completed {
        return Ok(AppStatus::Completed);
    }

    for container in &all {
        let waiting = container.state.as_ref().and_then(|s| s.waiting.as_ref());
        if let Some(waiting) = waiting
            && waiting.reason.as_deref() == Some(ERR_IMAGE_PULL_REASON)
        {
            return Err(DeployError::ErrImagePull {
                pod: pod_name,
                container: container.name.clone(),
                message: waiting.message.clone().unwrap_or_default(),
            });
        }
    }

    let main: Vec<&ContainerStatus> = status.container_statuses.iter().flatten().collect();
    if !main.is_empty() && main.iter().all(|c| is_running(c)) {
        return Ok(AppStatus::Started);
    }

    Ok(AppStatus::Other)
}

/// Names of the Pod's main containers that are currently running.
pub fn running_containers(pod: &Pod) -> Vec<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter(|c| is_running(c))
                .map(|c| c.name.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn is_running(container: &ContainerStatus) -> bool {
    container
        .state
        .as_ref()
        .is_some_and(|s| s.running.is_some())
}

fn is_terminated_with(container: &ContainerStatus, reason: &str) -> bool {
    container
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .is_some_and(|t| t.reason.as_deref() == Some(reason))
}
