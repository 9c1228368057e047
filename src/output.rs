// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes behind the Reporter trait.

use crate::deploy::AppStatus;
use serde::Serialize;
use std::time::Instant;

/// Sink for everything a deployment run tells the user.
pub trait Reporter: Send + Sync {
    /// An app's observed status advanced.
    fn status(&self, app: &str, status: AppStatus);

    /// Transfer progress in `[0, 1]` for a stage such as "pulling" or "pushing".
    fn progress(&self, app: &str, stage: &str, fraction: f64);

    /// One line of container output; `prefix` is already colored and padded.
    fn log_line(&self, app: &str, prefix: &str, line: &str);
}

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Instant,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: Instant::now(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Get elapsed time since the output was created.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn info(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                println!("{message} ({:.1}s)", self.elapsed_secs());
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => self.emit(JsonEvent {
                event: "success",
                message: Some(message),
                duration_secs: Some(self.elapsed_secs()),
                ..JsonEvent::new()
            }),
        }
    }

    /// Print a warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit(JsonEvent {
                event: "warning",
                message: Some(message),
                ..JsonEvent::new()
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message: Some(message),
                    duration_secs: Some(self.elapsed_secs()),
                    ..JsonEvent::new()
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    fn emit(&self, event: JsonEvent<'_>) {
        if let Ok(json) = serde_json::to_string(&event) {
            println!("{json}");
        }
    }
}

impl Reporter for Output {
    fn status(&self, app: &str, status: AppStatus) {
        match self.mode {
            OutputMode::Normal => println!("{app}: {status}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit(JsonEvent {
                event: "status",
                app: Some(app),
                status: Some(status),
                ..JsonEvent::new()
            }),
        }
    }

    fn progress(&self, app: &str, stage: &str, fraction: f64) {
        let percent = (fraction * 100.0).floor() as u32;
        match self.mode {
            OutputMode::Normal => println!("{app}: {stage} {percent}%"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit(JsonEvent {
                event: "progress",
                app: Some(app),
                stage: Some(stage),
                percent: Some(percent),
                ..JsonEvent::new()
            }),
        }
    }

    fn log_line(&self, app: &str, prefix: &str, line: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => println!("{prefix} | {line}"),
            OutputMode::Json => self.emit(JsonEvent {
                event: "log",
                app: Some(app),
                message: Some(line),
                ..JsonEvent::new()
            }),
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<AppStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    percent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

impl JsonEvent<'_> {
    fn new() -> Self {
        Self {
            event: "",
            timestamp: chrono::Utc::now(),
            app: None,
            status: None,
            stage: None,
            percent: None,
            message: None,
            duration_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_event_skips_empty_fields() {
        let event = JsonEvent {
            event: "status",
            app: Some("web"),
            status: Some(AppStatus::Ready),
            ..JsonEvent::new()
        };
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "status");
        assert_eq!(value["app"], "web");
        assert_eq!(value["status"], "ready");
        assert!(value.get("percent").is_none());
        assert!(value.get("timestamp").is_some());
    }
}
