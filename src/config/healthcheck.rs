// ABOUTME: Compose healthcheck configuration and the resolved probe definition.
// ABOUTME: Parses CMD / CMD-SHELL / NONE test forms from compose files and image configs.

use serde::Deserialize;
use std::time::Duration;

/// The command a healthcheck runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthcheckTest {
    /// Exec form: argv run directly.
    Cmd(Vec<String>),
    /// Shell form: run through `/bin/sh -c`.
    Shell(String),
}

impl HealthcheckTest {
    /// Parse the Docker array form (`["CMD", ...]`, `["CMD-SHELL", "..."]`, `["NONE"]`).
    ///
    /// `Ok(None)` means the healthcheck is explicitly disabled.
    pub fn from_docker_form(test: &[String]) -> Result<Option<Self>, String> {
        match test.split_first() {
            None => Err("healthcheck test cannot be empty".to_string()),
            Some((kind, _)) if kind == "NONE" => Ok(None),
            Some((kind, rest)) if kind == "CMD" => {
                if rest.is_empty() {
                    return Err("healthcheck CMD requires a command".to_string());
                }
                Ok(Some(HealthcheckTest::Cmd(rest.to_vec())))
            }
            Some((kind, rest)) if kind == "CMD-SHELL" => Ok(Some(HealthcheckTest::Shell(
                rest.join(" "),
            ))),
            Some((kind, _)) => Err(format!("unsupported healthcheck test type: {}", kind)),
        }
    }

    /// Argv for a Kubernetes exec probe.
    pub fn to_exec_command(&self) -> Vec<String> {
        match self {
            HealthcheckTest::Cmd(argv) => argv.clone(),
            HealthcheckTest::Shell(script) => vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                script.clone(),
            ],
        }
    }
}

/// A fully-resolved healthcheck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Healthcheck {
    pub test: HealthcheckTest,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

/// What a service says about its healthcheck.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HealthcheckOverride {
    /// Not declared: fall back to the image's healthcheck.
    #[default]
    Inherit,
    Disabled,
    Explicit(Healthcheck),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawTest {
    Shell(String),
    List(Vec<String>),
}

/// The `healthcheck:` block as written in a compose file.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthcheckConfig {
    #[serde(default)]
    test: Option<RawTest>,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,

    #[serde(default)]
    pub disable: bool,
}

impl HealthcheckConfig {
    pub fn resolve(&self) -> Result<HealthcheckOverride, String> {
        if self.disable {
            return Ok(HealthcheckOverride::Disabled);
        }

        let test = match &self.test {
            None => return Ok(HealthcheckOverride::Inherit),
            Some(RawTest::Shell(script)) => Some(HealthcheckTest::Shell(script.clone())),
            Some(RawTest::List(list)) => HealthcheckTest::from_docker_form(list)?,
        };

        Ok(match test {
            None => HealthcheckOverride::Disabled,
            Some(test) => HealthcheckOverride::Explicit(Healthcheck {
                test,
                interval: self.interval,
                timeout: self.timeout,
                retries: self.retries,
                start_period: self.start_period,
            }),
        })
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    3
}

fn default_start_period() -> Duration {
    Duration::ZERO
}

/// Build a healthcheck from an image config, where durations are nanoseconds
/// and zero means "use the default".
pub fn from_image_config(
    test: &[String],
    interval_ns: Option<i64>,
    timeout_ns: Option<i64>,
    retries: Option<i64>,
    start_period_ns: Option<i64>,
) -> Result<Option<Healthcheck>, String> {
    let Some(test) = HealthcheckTest::from_docker_form(test)? else {
        return Ok(None);
    };

    let nanos = |value: Option<i64>, default: Duration| match value {
        Some(ns) if ns > 0 => Duration::from_nanos(ns as u64),
        _ => default,
    };

    Ok(Some(Healthcheck {
        test,
        interval: nanos(interval_ns, default_interval()),
        timeout: nanos(timeout_ns, default_timeout()),
        retries: match retries {
            Some(r) if r > 0 => r as u32,
            _ => default_retries(),
        },
        start_period: nanos(start_period_ns, default_start_period()),
    }))
}
