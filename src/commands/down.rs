// ABOUTME: Down command implementation.
// ABOUTME: Deletes every Pod and Service of the environment and summarizes failures.

use super::connection::connect_to_cluster;
use kube_compose::config::Config;
use kube_compose::deploy::{Environment, teardown};
use kube_compose::diagnostics::{Diagnostics, WarningKind};
use kube_compose::error::Result;
use kube_compose::output::Output;

/// Tear down the environment.
pub async fn down(config: Config, output: &Output) -> Result<()> {
    let environment = Environment::new(
        config.settings.environment_label.clone(),
        config.environment_id()?,
    );
    let cluster = connect_to_cluster(&config, output).await?;

    output.info(&format!("Deleting objects labeled {}", environment.selector()));
    let result = teardown(&cluster, &environment).await?;

    let mut diag = Diagnostics::default();
    diag.extend(result.failures.iter().map(|f| f.to_warning()));
    for warning in diag.warnings() {
        output.warning(&warning.to_string());
    }

    let mut summary = format!(
        "Deleted {} pod(s) and {} service(s)",
        result.deleted_pods.len(),
        result.deleted_services.len()
    );
    if diag.has_warnings() {
        summary.push_str(&format!(
            ", {} could not be deleted",
            diag.count(WarningKind::Cleanup)
        ));
    }
    output.success(&summary);
    Ok(())
}
