// ABOUTME: Up command implementation.
// ABOUTME: Connects the backends, runs the orchestrator and reports the outcome.

use super::connection::{connect_to_cluster, connect_to_docker};
use kube_compose::config::Config;
use kube_compose::deploy::fs::OsFilesystem;
use kube_compose::deploy::{Backends, Orchestrator, RunOptions};
use kube_compose::error::Result;
use kube_compose::output::Output;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Deploy the selected services and wait for them to converge.
pub async fn up(config: Config, detach: bool, output: &Output) -> Result<()> {
    let environment_id = config.environment_id()?.to_string();
    output.info(&format!(
        "Deploying {} service(s) as environment {}",
        config.services.len(),
        environment_id
    ));

    let docker = connect_to_docker(output).await?;
    let cluster = connect_to_cluster(&config, output).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let reporter = Arc::new(Output::new(output.mode()));
    let orchestrator = Orchestrator::new(
        &config,
        Backends {
            docker: Arc::new(docker),
            cluster: Arc::new(cluster),
            fs: Arc::new(OsFilesystem),
            reporter,
        },
        RunOptions { detach },
        cancel,
    )?;

    let result = orchestrator.run().await;
    for warning in orchestrator.warnings() {
        output.warning(&warning.to_string());
    }

    match result {
        Ok(summary) => {
            output.success(&format!(
                "{} service(s) converged",
                summary.statuses.len()
            ));
            Ok(())
        }
        Err(e) => {
            if let Some(failure) = e.container_failure() {
                tracing::debug!(
                    pod = %failure.pod,
                    container = %failure.container,
                    exit_code = failure.exit_code,
                    "container failure"
                );
            }
            Err(e.into())
        }
    }
}
