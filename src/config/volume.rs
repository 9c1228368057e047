// ABOUTME: Bind mount parsing for compose `volumes:` entries.
// ABOUTME: Accepts host:container[:ro|rw]; named volumes are rejected.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(':').collect();
        let (host, container, mode) = match parts.as_slice() {
            [host, container] => (*host, *container, None),
            [host, container, mode] => (*host, *container, Some(*mode)),
            [_] => return Err(format!("anonymous volumes are not supported: {}", s)),
            _ => return Err(format!("invalid volume: {}", s)),
        };

        if !(host.starts_with('/') || host.starts_with('.') || host.starts_with('~')) {
            return Err(format!("named volumes are not supported: {}", host));
        }

        if !container.starts_with('/') {
            return Err(format!("container path must be absolute: {}", container));
        }

        let read_only = match mode {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(other) => return Err(format!("unsupported volume mode: {}", other)),
        };

        Ok(BindMount {
            host_path: PathBuf::from(host),
            container_path: container.to_string(),
            read_only,
        })
    }

    /// Make the host path absolute, relative to the compose file's directory.
    pub fn resolve_host_path(&mut self, base_dir: &Path) {
        let raw = self.host_path.to_string_lossy().into_owned();
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                self.host_path = PathBuf::from(home).join(rest);
            }
        } else if self.host_path.is_relative() {
            self.host_path = base_dir.join(&self.host_path);
        }
    }
}
