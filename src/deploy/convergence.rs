// ABOUTME: The List+Watch convergence loop that drives a deployment to completion.
// ABOUTME: Creates Pods as dependencies allow and stops once every app is Ready or Completed.

use super::app::{App, AppRegistry};
use super::cancellable;
use super::error::DeployError;
use super::fs::Filesystem;
use super::host_alias::HostAliasCoordinator;
use super::image::ImagePipeline;
use super::logs::LogSupervisor;
use super::manifest::{Environment, service_of};
use super::scheduler::Scheduler;
use super::status::{AppStatus, observe_pod, running_containers};
use crate::cluster::ClusterOps;
use crate::config::Config;
use crate::diagnostics::{Diagnostics, Warning};
use crate::output::Reporter;
use crate::runtime::DockerOps;
use futures::StreamExt;
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::api::WatchEvent;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How a run behaves once its apps converge.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Return as soon as every app converged instead of following logs.
    pub detach: bool,
}

/// Final state of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub statuses: BTreeMap<String, AppStatus>,
    pub warnings: Vec<Warning>,
}

/// The external services a run talks to.
pub struct Backends {
    pub docker: Arc<dyn DockerOps>,
    pub cluster: Arc<dyn ClusterOps>,
    pub fs: Arc<dyn Filesystem>,
    pub reporter: Arc<dyn Reporter>,
}

pub struct Orchestrator {
    registry: Arc<AppRegistry>,
    environment: Environment,
    cluster: Arc<dyn ClusterOps>,
    reporter: Arc<dyn Reporter>,
    pipeline: Arc<ImagePipeline>,
    host_aliases: Arc<HostAliasCoordinator>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    cancel: CancellationToken,
    options: RunOptions,
}

impl Orchestrator {
    /// # Errors
    ///
    /// `DeployError::Config` when the configuration lacks a valid environment ID.
    pub fn new(
        config: &Config,
        backends: Backends,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<Self, DeployError> {
        let environment_id = config
            .environment_id()
            .map_err(|e| DeployError::Config(e.to_string()))?
            .to_string();
        let settings = config.settings.clone();
        let environment = Environment::new(settings.environment_label.clone(), environment_id.clone());
        let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));

        let pipeline = ImagePipeline::new(
            backends.docker,
            backends.fs,
            backends.reporter.clone(),
            diagnostics.clone(),
            settings,
            environment_id.clone(),
            cancel.clone(),
        );
        let host_aliases =
            HostAliasCoordinator::new(backends.cluster.clone(), environment.clone(), cancel.clone());

        Ok(Self {
            registry: Arc::new(AppRegistry::new(config, &environment_id)),
            environment,
            cluster: backends.cluster,
            reporter: backends.reporter,
            pipeline: Arc::new(pipeline),
            host_aliases: Arc::new(host_aliases),
            diagnostics,
            cancel,
            options,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Warnings collected so far, including those of a failed run.
    pub fn warnings(&self) -> Vec<Warning> {
        self.diagnostics.lock().warnings().to_vec()
    }

    /// Deploy every app and wait until all of them are Ready or Completed.
    ///
    /// Unless detached, keeps following container logs afterwards until the
    /// streams end or the run is cancelled.
    pub async fn run(&self) -> Result<RunSummary, DeployError> {
        let mut background = self.spawn_preparation();
        let mut logs = LogSupervisor::new(
            self.cluster.clone(),
            self.reporter.clone(),
            self.diagnostics.clone(),
            self.cancel.clone(),
            self.registry.iter().map(|app| app.name().as_str()),
        );
        let mut scheduler = Scheduler::new(self.registry.dependency_map());

        let result = self.converge(&mut scheduler, &mut background, &mut logs).await;
        background.abort_all();
        if let Err(e) = result {
            logs.abort();
            return Err(e);
        }

        tracing::info!(apps = self.registry.len(), "all apps converged");
        if !self.options.detach {
            logs.wait().await;
        }

        let statuses = self
            .registry
            .iter()
            .map(|app| {
                let name = app.name().to_string();
                let status = scheduler.status(&name);
                (name, status)
            })
            .collect();
        Ok(RunSummary {
            statuses,
            warnings: self.warnings(),
        })
    }

    /// Start image preparation and Service creation for every app right away.
    fn spawn_preparation(&self) -> JoinSet<Result<(), DeployError>> {
        let mut tasks = JoinSet::new();
        for app in self.registry.iter() {
            let pipeline = self.pipeline.clone();
            let app = app.clone();
            tasks.spawn(async move {
                pipeline.image_info(&app).await?;
                pipeline.volume_init_image(&app).await?;
                Ok(())
            });
        }
        let host_aliases = self.host_aliases.clone();
        let registry = self.registry.clone();
        tasks.spawn(async move { host_aliases.host_aliases(&registry).await.map(|_| ()) });
        tasks
    }

    async fn converge(
        &self,
        scheduler: &mut Scheduler,
        background: &mut JoinSet<Result<(), DeployError>>,
        logs: &mut LogSupervisor,
    ) -> Result<(), DeployError> {
        self.create_admitted(scheduler).await?;

        let selector = self.environment.selector();
        let listing = cancellable(&self.cancel, self.cluster.list_pods(&selector)).await?;
        let listed = listing
            .items
            .iter()
            .filter(|pod| self.tracked_app(pod, scheduler).is_some())
            .count();
        if listed < scheduler.created().len() {
            return Err(DeployError::ExternallyModified(format!(
                "listed {} of {} pods created for this environment",
                listed,
                scheduler.created().len()
            )));
        }
        for pod in &listing.items {
            self.observe(scheduler, pod, logs)?;
        }
        self.create_admitted(scheduler).await?;

        if scheduler.all_converged() {
            return Ok(());
        }

        let mut events = cancellable(
            &self.cancel,
            self.cluster.watch_pods(&selector, &listing.resource_version),
        )
        .await?;
        while !scheduler.all_converged() {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
                Some(done) = background.join_next() => {
                    // Preparation failures surface here before any Pod needs them.
                    match done {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(e),
                        Err(e) if e.is_panic() => {
                            tracing::error!("preparation task panicked: {}", e);
                            return Err(DeployError::TaskPanicked(e.to_string()));
                        }
                        Err(_) => {}
                    }
                    continue;
                }
                event = events.next() => event,
            };

            match event {
                None => return Err(DeployError::WatchClosed("pods")),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(WatchEvent::Added(pod) | WatchEvent::Modified(pod))) => {
                    self.observe(scheduler, &pod, logs)?;
                    self.create_admitted(scheduler).await?;
                }
                Some(Ok(WatchEvent::Deleted(pod))) => {
                    if let Some(app) = self.tracked_app(&pod, scheduler) {
                        return Err(DeployError::ExternallyModified(format!(
                            "pod of {} was deleted",
                            app.name()
                        )));
                    }
                }
                Some(Ok(WatchEvent::Bookmark(_))) => {}
                Some(Ok(WatchEvent::Error(e))) => {
                    return Err(DeployError::UnexpectedEvent(e.message));
                }
            }
        }
        Ok(())
    }

    /// Fold one Pod observation into the scheduler.
    fn observe(
        &self,
        scheduler: &mut Scheduler,
        pod: &Pod,
        logs: &mut LogSupervisor,
    ) -> Result<(), DeployError> {
        let Some(app) = service_of(&pod.metadata).and_then(|name| self.registry.get(name)) else {
            return Ok(());
        };
        let name = app.name().to_string();
        let observed = observe_pod(pod)?;
        if scheduler.observe(&name, observed) {
            tracing::info!(app = %name, status = %scheduler.status(&name), "status changed");
            self.reporter.status(&name, scheduler.status(&name));
        }

        if !self.options.detach
            && let Some(pod_name) = pod.metadata.name.as_deref()
        {
            for container in running_containers(pod) {
                logs.follow(&name, pod_name, &container);
            }
        }
        Ok(())
    }

    /// Create Pods for every newly admitted app, concurrently.
    async fn create_admitted(&self, scheduler: &mut Scheduler) -> Result<(), DeployError> {
        let admitted: Vec<Arc<App>> = scheduler
            .admit()
            .iter()
            .filter_map(|name| self.registry.get(name).cloned())
            .collect();
        if admitted.is_empty() {
            return Ok(());
        }

        try_join_all(admitted.iter().map(|app| self.create_pod(app))).await?;
        for app in &admitted {
            scheduler.mark_created(app.name().as_str());
        }
        Ok(())
    }

    async fn create_pod(&self, app: &App) -> Result<(), DeployError> {
        let image = self.pipeline.image_info(app).await?;
        let volume_init = self.pipeline.volume_init_image(app).await?;
        let host_aliases = self.host_aliases.host_aliases(&self.registry).await?;

        let pod = self
            .environment
            .pod(app, &image, volume_init.as_deref(), &host_aliases)?;
        match cancellable(&self.cancel, self.cluster.create_pod(&pod)).await {
            Ok(()) => {
                tracing::info!(app = %app.name(), pod = app.object_name(), "created pod");
                Ok(())
            }
            Err(DeployError::Cluster(e)) if e.is_already_exists() => {
                tracing::debug!(pod = app.object_name(), "pod already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The app a Pod belongs to, if its Pod was created in this run.
    fn tracked_app(&self, pod: &Pod, scheduler: &Scheduler) -> Option<&Arc<App>> {
        service_of(&pod.metadata)
            .filter(|name| scheduler.is_created(name))
            .and_then(|name| self.registry.get(name))
    }
}
