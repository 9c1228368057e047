// ABOUTME: Compose service names and their Kubernetes-safe escaped form.
// ABOUTME: Escaping follows RFC 1123 label rules so names can prefix object names.

use std::fmt;
use thiserror::Error;

/// Longest escaped name that still leaves room for `-<environmentID>`.
const MAX_ESCAPED_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum ServiceNameError {
    #[error("service name cannot be empty")]
    Empty,

    #[error("service name exceeds maximum length of {MAX_ESCAPED_LEN} characters")]
    TooLong,

    #[error("service name must start with a letter or digit")]
    BadStart,

    #[error("invalid character in service name: '{0}'")]
    InvalidChar(char),
}

/// A compose service name, e.g. `web`, `Db_Primary` or `api.v2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(value: &str) -> Result<Self, ServiceNameError> {
        let first = value.chars().next().ok_or(ServiceNameError::Empty)?;

        if value.len() > MAX_ESCAPED_LEN {
            return Err(ServiceNameError::TooLong);
        }

        if !first.is_ascii_alphanumeric() {
            return Err(ServiceNameError::BadStart);
        }

        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !"-_.".contains(*c))
        {
            return Err(ServiceNameError::InvalidChar(c));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase RFC 1123 label used in object names and the `app` label.
    ///
    /// `_` and `.` become `-`; trailing hyphens are trimmed. Two services can
    /// escape to the same label, which the config loader rejects.
    pub fn escaped(&self) -> String {
        let escaped: String = self
            .0
            .chars()
            .map(|c| match c {
                '_' | '.' => '-',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        escaped.trim_end_matches('-').to_string()
    }

    /// Whether the escaped form can name a Kubernetes Service (RFC 1035 label).
    pub fn is_service_label(&self) -> bool {
        self.escaped().starts_with(|c: char| c.is_ascii_lowercase())
    }

    /// Names other Pods resolve this service by through host aliases.
    ///
    /// The escaped form is always included; the compose name only when it is
    /// itself a valid RFC 1123 subdomain.
    pub fn host_names(&self) -> Vec<String> {
        let escaped = self.escaped();
        if self.0 != escaped && is_dns_subdomain(&self.0) {
            vec![self.0.clone(), escaped]
        } else {
            vec![escaped]
        }
    }
}

fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= 253
        && value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::borrow::Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
