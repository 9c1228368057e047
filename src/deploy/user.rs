// ABOUTME: Resolves a `user[:group]` spec to numeric IDs using an image's passwd and group files.
// ABOUTME: Files are copied out of a throwaway container as tar archives.

use super::error::DeployError;
use crate::config::{IdSpec, UserSpec};
use crate::diagnostics::{Diagnostics, Warning};
use crate::runtime::{ContainerError, DockerOps};
use crate::types::{ContainerId, ImageId};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::Arc;

const PASSWD_PATH: &str = "/etc/passwd";
const GROUP_PATH: &str = "/etc/group";

/// A `name:password:id:...` database entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    id: u32,
    /// Primary group for passwd entries.
    gid: Option<u32>,
}

fn parse_database(content: &str, with_gid: bool) -> Vec<Entry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            let name = fields.first()?.to_string();
            let id = fields.get(2)?.parse().ok()?;
            let gid = if with_gid {
                Some(fields.get(3)?.parse().ok()?)
            } else {
                None
            };
            Some(Entry { name, id, gid })
        })
        .collect()
}

/// Resolve `spec` against passwd and group file contents.
///
/// A numeric user missing from passwd gets group 0, like the Docker daemon does.
pub fn resolve_ids(spec: &UserSpec, passwd: &str, group: &str) -> Result<(u32, u32), String> {
    let users = parse_database(passwd, true);

    let (uid, primary_gid) = match &spec.user {
        IdSpec::Numeric(uid) => {
            let gid = users.iter().find(|u| u.id == *uid).and_then(|u| u.gid);
            (*uid, gid.unwrap_or(0))
        }
        IdSpec::Name(name) => {
            let entry = users
                .iter()
                .find(|u| &u.name == name)
                .ok_or_else(|| format!("user {} not found in {}", name, PASSWD_PATH))?;
            (entry.id, entry.gid.unwrap_or(0))
        }
    };

    let gid = match &spec.group {
        None => primary_gid,
        Some(IdSpec::Numeric(gid)) => *gid,
        Some(IdSpec::Name(name)) => parse_database(group, false)
            .iter()
            .find(|g| &g.name == name)
            .map(|g| g.id)
            .ok_or_else(|| format!("group {} not found in {}", name, GROUP_PATH))?,
    };

    Ok((uid, gid))
}

/// Read the single file in a tar archive returned by a container copy.
pub fn read_single_file(archive: &[u8]) -> std::io::Result<String> {
    let mut archive = tar::Archive::new(archive);
    let mut entries = archive.entries()?;
    let mut entry = entries
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty archive"))??;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

/// Resolve a user spec to numeric IDs, reading the image's files only when needed.
pub async fn resolve_user(
    docker: Arc<dyn DockerOps>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    image: &ImageId,
    spec: &UserSpec,
) -> Result<(u32, u32), DeployError> {
    if let Some(ids) = spec.numeric() {
        return Ok(ids);
    }

    let id = docker.create_container(image).await?;
    let container = ThrowawayContainer {
        docker: docker.clone(),
        diagnostics,
        id: Some(id.clone()),
    };
    let files = read_user_files(docker.as_ref(), &id).await;
    container.remove().await;
    let (passwd, group) = files?;

    resolve_ids(spec, &passwd, &group).map_err(DeployError::Config)
}

/// A container created only to copy files out of; removed when dropped.
struct ThrowawayContainer {
    docker: Arc<dyn DockerOps>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    id: Option<ContainerId>,
}

impl ThrowawayContainer {
    async fn remove(mut self) {
        if let Some(id) = self.id.take() {
            let result = self.docker.remove_container(&id).await;
            record_removal(&self.diagnostics, &id, result);
        }
    }
}

impl Drop for ThrowawayContainer {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(container = %id, "no runtime left to remove throwaway container");
            return;
        };
        let docker = self.docker.clone();
        let diagnostics = self.diagnostics.clone();
        tracing::debug!(container = %id, "removing throwaway container in the background");
        handle.spawn(async move {
            let result = docker.remove_container(&id).await;
            record_removal(&diagnostics, &id, result);
        });
    }
}

fn record_removal(
    diagnostics: &Mutex<Diagnostics>,
    id: &ContainerId,
    result: Result<(), ContainerError>,
) {
    if let Err(e) = result {
        diagnostics.lock().warn(Warning::cleanup(format!(
            "failed to remove throwaway container {}: {}",
            id, e
        )));
    }
}

async fn read_user_files(
    docker: &dyn DockerOps,
    container: &ContainerId,
) -> Result<(String, String), DeployError> {
    let passwd = docker.copy_from_container(container, PASSWD_PATH).await?;
    // An image without /etc/group can still resolve numeric groups.
    let group = match docker.copy_from_container(container, GROUP_PATH).await {
        Ok(archive) => read_single_file(&archive)?,
        Err(ContainerError::PathNotFound(_)) => String::new(),
        Err(e) => return Err(e.into()),
    };
    Ok((read_single_file(&passwd)?, group))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/sh\n\
                          # comment\n\
                          app:x:1000:1001::/home/app:/bin/sh\n";
    const GROUP: &str = "root:x:0:\nstaff:x:50:app\napp:x:1001:\n";

    #[test]
    fn resolves_names_through_passwd() {
        let spec = UserSpec::parse("app").unwrap();
        assert_eq!(resolve_ids(&spec, PASSWD, GROUP).unwrap(), (1000, 1001));
    }

    #[test]
    fn explicit_group_name() {
        let spec = UserSpec::parse("app:staff").unwrap();
        assert_eq!(resolve_ids(&spec, PASSWD, GROUP).unwrap(), (1000, 50));
    }

    #[test]
    fn unknown_numeric_user_gets_group_zero() {
        let spec = UserSpec::parse("4242").unwrap();
        assert_eq!(resolve_ids(&spec, PASSWD, GROUP).unwrap(), (4242, 0));
    }

    #[test]
    fn unknown_user_name_is_an_error() {
        let spec = UserSpec::parse("nobody").unwrap();
        let err = resolve_ids(&spec, PASSWD, GROUP).unwrap_err();
        assert!(err.contains("nobody"));
    }

    #[test]
    fn reads_file_from_archive() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(PASSWD.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "passwd", PASSWD.as_bytes())
            .unwrap();
        let archive = builder.into_inner().unwrap();
        assert_eq!(read_single_file(&archive).unwrap(), PASSWD);
    }
}
