// ABOUTME: Accumulator for best-effort failures that never fail a run.
// ABOUTME: Log streams, cleanup and degraded bind-mount entries end up here.

use std::fmt;

/// Warnings collected during a run, each logged once when recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = %warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for warning in warnings {
            self.warn(warning);
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// How many warnings of `kind` were recorded.
    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn log_stream(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LogStream, message)
    }

    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Cleanup, message)
    }

    /// A bind-mount entry snapshotted as an empty directory.
    pub fn volume_entry_degraded(message: impl Into<String>) -> Self {
        Self::new(WarningKind::VolumeEntryDegraded, message)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A container's log stream failed or could not be opened.
    LogStream,
    /// Removing a throwaway container or a cluster object failed.
    Cleanup,
    /// A bind-mount entry could not be read.
    VolumeEntryDegraded,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WarningKind::LogStream => "log stream",
            WarningKind::Cleanup => "cleanup",
            WarningKind::VolumeEntryDegraded => "bind mount",
        })
    }
}
