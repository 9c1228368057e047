// ABOUTME: Follows the logs of every running container, each at most once.
// ABOUTME: Lines are prefixed with a padded, colored app name; failures become warnings.

use crate::cluster::ClusterOps;
use crate::diagnostics::{Diagnostics, Warning};
use crate::output::Reporter;
use colored::{Color, Colorize};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const PALETTE: &[Color] = &[
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::BrightCyan,
    Color::BrightYellow,
    Color::BrightGreen,
    Color::BrightMagenta,
    Color::BrightBlue,
];

pub struct LogSupervisor {
    cluster: Arc<dyn ClusterOps>,
    reporter: Arc<dyn Reporter>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    cancel: CancellationToken,
    prefixes: BTreeMap<String, String>,
    started: HashSet<(String, String)>,
    tasks: JoinSet<()>,
}

impl LogSupervisor {
    /// `apps` are every app of the run; prefixes are padded to the longest name.
    pub fn new<'a>(
        cluster: Arc<dyn ClusterOps>,
        reporter: Arc<dyn Reporter>,
        diagnostics: Arc<Mutex<Diagnostics>>,
        cancel: CancellationToken,
        apps: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let apps: Vec<&str> = apps.into_iter().collect();
        let width = apps.iter().map(|app| app.chars().count()).max().unwrap_or(0);
        let prefixes = apps
            .iter()
            .enumerate()
            .map(|(i, app)| {
                let padded = format!("{:<width$}", app, width = width);
                (app.to_string(), padded.color(PALETTE[i % PALETTE.len()]).to_string())
            })
            .collect();

        Self {
            cluster,
            reporter,
            diagnostics,
            cancel,
            prefixes,
            started: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Start following `container` of `pod` unless it is already followed.
    pub fn follow(&mut self, app: &str, pod: &str, container: &str) -> bool {
        if !self.started.insert((pod.to_string(), container.to_string())) {
            return false;
        }
        tracing::debug!(app, pod, container, "following logs");

        let prefix = self
            .prefixes
            .get(app)
            .cloned()
            .unwrap_or_else(|| app.to_string());
        self.tasks.spawn(stream_logs(
            self.cluster.clone(),
            self.reporter.clone(),
            self.diagnostics.clone(),
            self.cancel.clone(),
            LogTarget {
                app: app.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                prefix,
            },
        ));
        true
    }

    pub fn followed(&self) -> usize {
        self.started.len()
    }

    /// Wait for every stream to end. Cancelling the run's token ends them early.
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!("log task panicked: {}", e);
            }
        }
    }

    pub fn abort(&mut self) {
        self.tasks.abort_all();
    }
}

struct LogTarget {
    app: String,
    pod: String,
    container: String,
    prefix: String,
}

async fn stream_logs(
    cluster: Arc<dyn ClusterOps>,
    reporter: Arc<dyn Reporter>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    cancel: CancellationToken,
    target: LogTarget,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = cluster.pod_logs(&target.pod, &target.container) => opened,
    };
    let mut lines = match opened {
        Ok(lines) => lines,
        Err(e) => {
            diagnostics.lock().warn(Warning::log_stream(format!(
                "{}: cannot follow logs of {}/{}: {}",
                target.app, target.pod, target.container, e
            )));
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => reporter.log_line(&target.app, &target.prefix, &line),
            Some(Err(e)) => {
                diagnostics.lock().warn(Warning::log_stream(format!(
                    "{}: log stream of {}/{} failed: {}",
                    target.app, target.pod, target.container, e
                )));
                break;
            }
            None => break,
        }
    }
    tracing::debug!(pod = %target.pod, container = %target.container, "log stream ended");
}
