// ABOUTME: Compose restart policy and its Kubernetes Pod equivalent.
// ABOUTME: Accepts no, always, unless-stopped and on-failure[:max-retries].

use serde::Deserialize;
use std::fmt;

/// `restart:` of a compose service. Compose defaults to `no`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure {
        max_retries: Option<u32>,
    },
}

impl RestartPolicy {
    /// Pod `restartPolicy`. Kubernetes has no retry limit, so it is dropped.
    pub fn as_pod_restart_policy(&self) -> &'static str {
        match self {
            RestartPolicy::No => "Never",
            RestartPolicy::Always | RestartPolicy::UnlessStopped => "Always",
            RestartPolicy::OnFailure { .. } => "OnFailure",
        }
    }
}

impl TryFrom<String> for RestartPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (name, retries) = match value.split_once(':') {
            Some((name, retries)) => (name, Some(retries)),
            None => (value.as_str(), None),
        };
        match (name, retries) {
            ("no", None) => Ok(RestartPolicy::No),
            ("always", None) => Ok(RestartPolicy::Always),
            ("unless-stopped", None) => Ok(RestartPolicy::UnlessStopped),
            ("on-failure", retries) => {
                let max_retries = retries
                    .map(|r| r.parse().map_err(|_| format!("invalid max retries: {r}")))
                    .transpose()?;
                Ok(RestartPolicy::OnFailure { max_retries })
            }
            _ => Err(format!("unknown restart policy: {value}")),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => f.write_str("no"),
            RestartPolicy::Always => f.write_str("always"),
            RestartPolicy::UnlessStopped => f.write_str("unless-stopped"),
            RestartPolicy::OnFailure { max_retries: None } => f.write_str("on-failure"),
            RestartPolicy::OnFailure {
                max_retries: Some(n),
            } => write!(f, "on-failure:{n}"),
        }
    }
}
