// ABOUTME: Container image reference parsing and normalization.
// ABOUTME: Distinguishes named references (nginx:1.25, host/repo@digest) from bare image IDs.

use std::fmt;
use thiserror::Error;

const DEFAULT_REGISTRY: &str = "docker.io";
const OFFICIAL_NAMESPACE: &str = "library";

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// A named image reference: `[registry/]name[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        if let Some(c) = input
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !"/:.-_@".contains(*c))
        {
            return Err(ParseImageRefError::InvalidChar(c));
        }

        let (without_digest, digest) = match input.split_once('@') {
            Some((before, after)) if !after.is_empty() => (before, Some(after.to_string())),
            Some(_) => return Err(ParseImageRefError::InvalidFormat(input.to_string())),
            None => (input, None),
        };

        // A colon followed by a path segment is a registry port, not a tag.
        let (without_tag, tag) = match without_digest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => (before, Some(after.to_string())),
            _ => (without_digest, None),
        };

        let (registry, name) = Self::parse_registry_and_name(without_tag)?;
        if name.is_empty() || name.split('/').any(str::is_empty) {
            return Err(ParseImageRefError::InvalidFormat(input.to_string()));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            name,
            tag,
            digest,
        })
    }

    fn parse_registry_and_name(
        input: &str,
    ) -> Result<(Option<String>, String), ParseImageRefError> {
        match input.split_once('/') {
            None => Ok((None, input.to_string())),
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                Ok((Some(first.to_string()), rest.to_string()))
            }
            Some(_) => Ok((None, input.to_string())),
        }
    }

    /// Build a reference from its parts.
    pub fn new(registry: Option<&str>, name: &str, tag: &str) -> Result<Self, ParseImageRefError> {
        let joined = match registry {
            Some(registry) => format!("{registry}/{name}:{tag}"),
            None => format!("{name}:{tag}"),
        };
        Self::parse(&joined)
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The fully-qualified repository, e.g. `docker.io/library/nginx`.
    pub fn repository(&self) -> String {
        let registry = self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY);
        if registry == DEFAULT_REGISTRY && !self.name.contains('/') {
            format!("{registry}/{OFFICIAL_NAMESPACE}/{}", self.name)
        } else {
            format!("{registry}/{}", self.name)
        }
    }

    /// The same repository pinned to `digest`, dropping any tag.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    /// Whether a daemon `RepoTags` entry names this reference.
    pub fn matches_repo_tag(&self, repo_tag: &str) -> bool {
        let Some(tag) = self.tag.as_deref() else {
            return false;
        };
        ImageRef::parse(repo_tag)
            .map(|other| {
                other.repository() == self.repository() && other.tag.as_deref() == Some(tag)
            })
            .unwrap_or(false)
    }

    /// Whether a daemon `RepoDigests` entry pins this repository to `digest`.
    pub fn matches_repo_digest(&self, repo_digest: &str, digest: &str) -> bool {
        ImageRef::parse(repo_digest)
            .map(|other| {
                other.repository() == self.repository() && other.digest.as_deref() == Some(digest)
            })
            .unwrap_or(false)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// The `image:` value of a compose service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A repository reference that can be pulled.
    Named(ImageRef),
    /// A bare local image ID (`sha256:...` or 64 hex digits); never pullable.
    Id(String),
}

impl ImageSource {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if let Some(hex) = input.strip_prefix("sha256:") {
            if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ParseImageRefError::InvalidFormat(input.to_string()));
            }
            return Ok(ImageSource::Id(input.to_string()));
        }
        if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(ImageSource::Id(format!("sha256:{input}")));
        }
        ImageRef::parse(input).map(ImageSource::Named)
    }

    pub fn named(&self) -> Option<&ImageRef> {
        match self {
            ImageSource::Named(r) => Some(r),
            ImageSource::Id(_) => None,
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Named(r) => write!(f, "{r}"),
            ImageSource::Id(id) => write!(f, "{id}"),
        }
    }
}
