// ABOUTME: Weighted progress tracking for image pull and push streams.
// ABOUTME: Also waits for a transfer to finish and extracts the content digest.

use super::error::DeployError;
use crate::runtime::{TransferMessage, TransferStream};
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Pull stages in order, with their relative weights.
pub const PULL_STAGES: &[(&str, u32)] = &[
    ("Waiting", 1),
    ("Pulling fs layer", 1),
    ("Downloading", 20),
    ("Verifying Checksum", 1),
    ("Download complete", 1),
    ("Extracting", 5),
    ("Pull complete", 1),
];

/// Push stages in order, with their relative weights.
pub const PUSH_STAGES: &[(&str, u32)] = &[
    ("Waiting", 1),
    ("Preparing", 1),
    ("Pushing", 20),
    ("Pushed", 1),
];

/// Statuses meaning the layer needs no transfer at all.
const SKIPPED_STATUSES: &[&str] = &["Already exists", "Layer already exists"];
const MOUNTED_PREFIX: &str = "Mounted from";

/// Overall progress of one transfer, in `[0, 1]`, never decreasing.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    stages: &'static [(&'static str, u32)],
    total_weight: u32,
    layers: BTreeMap<String, f64>,
    reported: f64,
}

impl TransferProgress {
    pub fn new(stages: &'static [(&'static str, u32)]) -> Self {
        Self {
            stages,
            total_weight: stages.iter().map(|(_, w)| w).sum(),
            layers: BTreeMap::new(),
            reported: 0.0,
        }
    }

    pub fn pull() -> Self {
        Self::new(PULL_STAGES)
    }

    pub fn push() -> Self {
        Self::new(PUSH_STAGES)
    }

    pub fn value(&self) -> f64 {
        self.reported
    }

    /// Fold one daemon message in and return the overall progress.
    pub fn update(&mut self, message: &TransferMessage) -> f64 {
        let (Some(id), Some(status)) = (message.id.as_deref(), message.status.as_deref()) else {
            return self.reported;
        };

        let observed = self.layer_fraction(status, message.current, message.total);
        let layer = self.layers.entry(id.to_string()).or_insert(0.0);
        if let Some(observed) = observed
            && observed > *layer
        {
            *layer = observed;
        }

        let mean = self.layers.values().sum::<f64>() / self.layers.len() as f64;
        if mean > self.reported {
            self.reported = mean;
        }
        self.reported
    }

    /// Fraction of one layer's work a status represents; `None` for statuses
    /// that say nothing about progress.
    fn layer_fraction(&self, status: &str, current: Option<i64>, total: Option<i64>) -> Option<f64> {
        if SKIPPED_STATUSES.contains(&status) || status.starts_with(MOUNTED_PREFIX) {
            return Some(1.0);
        }

        let index = self.stages.iter().position(|(name, _)| *name == status)?;
        if index == self.stages.len() - 1 {
            return Some(1.0);
        }

        let before: u32 = self.stages[..index].iter().map(|(_, w)| w).sum();
        let weight = self.stages[index].1 as f64;
        let within = match (current, total) {
            (Some(current), Some(total)) if total > 0 => {
                (current as f64 / total as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        Some((before as f64 + within * weight) / self.total_weight as f64)
    }
}

/// Extract `sha256:...` from a `Digest: ...` (pull) or `tag: digest: ... size: N` (push) status.
pub fn parse_digest(status: &str) -> Option<String> {
    let lower = status.to_ascii_lowercase();
    let start = lower.find("digest: ")? + "digest: ".len();
    status[start..]
        .split_whitespace()
        .next()
        .filter(|token| token.starts_with("sha256:"))
        .map(str::to_string)
}

/// Drive a pull or push stream to its end.
///
/// `on_progress` is called whenever overall progress crosses a whole percent.
///
/// # Errors
///
/// The first daemon error, `DeployError::TransferIncomplete` when the stream
/// ends without a digest, or `DeployError::Cancelled`.
pub async fn await_transfer(
    mut stream: TransferStream,
    mut progress: TransferProgress,
    reference: &str,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(f64),
) -> Result<String, DeployError> {
    let mut digest = None;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            next = stream.next() => next,
        };

        let message = match next {
            Some(message) => message?,
            None => break,
        };

        if let Some(found) = message.status.as_deref().and_then(parse_digest) {
            digest = Some(found);
        }

        let before = percent(progress.value());
        let after = progress.update(&message);
        if percent(after) > before {
            on_progress(after);
        }
    }

    let digest = digest.ok_or_else(|| DeployError::TransferIncomplete(reference.to_string()))?;
    if percent(progress.value()) < 100 {
        on_progress(1.0);
    }
    tracing::debug!(image = %reference, %digest, "transfer complete");
    Ok(digest)
}

fn percent(value: f64) -> u32 {
    (value * 100.0).floor() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downloading_halfway() {
        let mut p = TransferProgress::pull();
        let msg = TransferMessage::layer("a", "Downloading").with_progress(50, 100);
        let value = p.update(&msg);
        // (Waiting 1 + Pulling fs layer 1 + half of Downloading 20) / 30
        assert!((value - 12.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn complete_only_when_every_layer_is_terminal() {
        let mut p = TransferProgress::pull();
        p.update(&TransferMessage::layer("a", "Pull complete"));
        p.update(&TransferMessage::layer("b", "Extracting").with_progress(10, 10));
        assert!(p.value() < 1.0);
        p.update(&TransferMessage::layer("b", "Pull complete"));
        assert_eq!(p.value(), 1.0);
    }

    #[test]
    fn skipped_layers_count_as_done() {
        let mut p = TransferProgress::push();
        p.update(&TransferMessage::layer("a", "Layer already exists"));
        p.update(&TransferMessage::layer("b", "Mounted from library/nginx"));
        assert_eq!(p.value(), 1.0);
    }

    #[test]
    fn earlier_stage_never_lowers_a_layer() {
        let mut p = TransferProgress::pull();
        let extracting = p.update(&TransferMessage::layer("a", "Extracting").with_progress(1, 2));
        let downloading = p.update(&TransferMessage::layer("a", "Downloading").with_progress(1, 2));
        assert_eq!(extracting, downloading);
    }

    #[test]
    fn messages_without_layer_are_ignored() {
        let mut p = TransferProgress::pull();
        assert_eq!(p.update(&TransferMessage::status("Pulling from library/nginx")), 0.0);
    }

    #[test]
    fn parses_pull_and_push_digests() {
        assert_eq!(
            parse_digest("Digest: sha256:abc123").as_deref(),
            Some("sha256:abc123")
        );
        assert_eq!(
            parse_digest("dev: digest: sha256:def456 size: 1570").as_deref(),
            Some("sha256:def456")
        );
        assert_eq!(parse_digest("Status: Downloaded newer image"), None);
    }
}
