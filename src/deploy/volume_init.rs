// ABOUTME: Builds the tar context of the volume-init image that emulates bind mounts.
// ABOUTME: Snapshots each host tree, resolving symlinks without leaving the volume root.

use super::fs::{EntryKind, Filesystem};
use crate::config::BindMount;
use crate::diagnostics::Warning;
use crate::types::ImageRef;
use std::collections::{BTreeSet, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Symlink hops allowed while resolving one path.
const MAX_SYMLINK_HOPS: usize = 40;

const DATA_DIR: &str = "data";
const IMAGE_DATA_DIR: &str = "/app/data";
const MOUNT_DIR: &str = "/mnt";

/// Name of the Nth (zero-based) emulated volume, shared by the image and the Pod.
pub fn volume_name(index: usize) -> String {
    format!("vol{}", index + 1)
}

/// Where the init container mounts the Nth volume.
pub fn init_mount_path(index: usize) -> String {
    format!("{}/{}", MOUNT_DIR, volume_name(index))
}

/// The subPath of the volume holding the snapshot.
pub const SNAPSHOT_SUBPATH: &str = "root";

/// A tar build context ready for `ImageOps::build_image`.
#[derive(Debug)]
pub struct BuildContext {
    pub archive: Vec<u8>,
    pub dockerfile: String,
    pub warnings: Vec<Warning>,
}

/// Dockerfile copying each snapshot into the image and out into the volumes at start.
pub fn dockerfile(base_image: &ImageRef, volume_count: usize) -> String {
    let mut lines = vec![format!("FROM {}", base_image)];
    let mut copies = Vec::new();
    for index in 0..volume_count {
        let name = volume_name(index);
        lines.push(format!(
            "COPY {DATA_DIR}/{name} {IMAGE_DATA_DIR}/{name}"
        ));
        copies.push(format!(
            "cp -a {IMAGE_DATA_DIR}/{name}/{SNAPSHOT_SUBPATH} {}/",
            init_mount_path(index)
        ));
    }
    let script = if copies.is_empty() {
        "true".to_string()
    } else {
        copies.join(" && ")
    };
    lines.push(format!(
        "ENTRYPOINT [\"/bin/sh\", \"-c\", \"{}\"]",
        script.replace('"', "\\\"")
    ));
    lines.join("\n") + "\n"
}

/// Snapshot every bind mount into a build context.
///
/// Entries that cannot be read become empty directories and are reported as
/// warnings instead of failing the build.
pub fn build_context(
    fs: &dyn Filesystem,
    mounts: &[BindMount],
    base_image: &ImageRef,
) -> io::Result<BuildContext> {
    let mut snapshot = Snapshot {
        fs,
        builder: tar::Builder::new(Vec::new()),
        warnings: Vec::new(),
    };

    for (index, mount) in mounts.iter().enumerate() {
        let root = follow_root(fs, &normalize(&mount.host_path));
        let archive_root = PathBuf::from(DATA_DIR).join(volume_name(index));
        snapshot.append_dir(&archive_root, 0o755)?;

        let target = archive_root.join(SNAPSHOT_SUBPATH);
        let mut ancestors = BTreeSet::new();
        snapshot.add_entry(&root, &root, &target, &mut ancestors)?;
    }

    let dockerfile = dockerfile(base_image, mounts.len());
    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    snapshot
        .builder
        .append_data(&mut header, "Dockerfile", dockerfile.as_bytes())?;

    Ok(BuildContext {
        archive: snapshot.builder.into_inner()?,
        dockerfile,
        warnings: snapshot.warnings,
    })
}

struct Snapshot<'a> {
    fs: &'a dyn Filesystem,
    builder: tar::Builder<Vec<u8>>,
    warnings: Vec<Warning>,
}

impl Snapshot<'_> {
    /// Add `path` (inside `root`) to the archive at `target`.
    fn add_entry(
        &mut self,
        root: &Path,
        path: &Path,
        target: &Path,
        ancestors: &mut BTreeSet<PathBuf>,
    ) -> io::Result<()> {
        let resolved = match self.fs.entry_kind(path) {
            Ok(EntryKind::Symlink) => match resolve_in_root(self.fs, root, path) {
                Ok(resolved) => resolved,
                Err(reason) => return self.degrade(path, target, &reason),
            },
            Ok(_) => path.to_path_buf(),
            Err(e) => return self.degrade(path, target, &e.to_string()),
        };

        match self.fs.entry_kind(&resolved) {
            Ok(EntryKind::File { mode }) => match self.fs.read_file(&resolved) {
                Ok(content) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_size(content.len() as u64);
                    header.set_mode(mode);
                    self.builder
                        .append_data(&mut header, target, content.as_slice())
                }
                Err(e) => self.degrade(path, target, &e.to_string()),
            },
            Ok(EntryKind::Dir { mode }) => {
                if !ancestors.insert(resolved.clone()) {
                    return self.degrade(path, target, "symlink loop");
                }
                let result = self.add_dir(root, &resolved, target, mode, ancestors);
                ancestors.remove(&resolved);
                result
            }
            Ok(EntryKind::Symlink) => self.degrade(path, target, "unresolved symlink"),
            Ok(EntryKind::Other) => self.degrade(path, target, "unsupported file type"),
            Err(e) => self.degrade(path, target, &e.to_string()),
        }
    }

    fn add_dir(
        &mut self,
        root: &Path,
        dir: &Path,
        target: &Path,
        mode: u32,
        ancestors: &mut BTreeSet<PathBuf>,
    ) -> io::Result<()> {
        let children = match self.fs.read_dir(dir) {
            Ok(children) => children,
            Err(e) => return self.degrade(dir, target, &e.to_string()),
        };
        self.append_dir(target, mode)?;
        for child in children {
            let Some(name) = child.file_name() else {
                continue;
            };
            let child_target = target.join(name);
            self.add_entry(root, &child, &child_target, ancestors)?;
        }
        Ok(())
    }

    fn append_dir(&mut self, target: &Path, mode: u32) -> io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(mode);
        self.builder.append_data(&mut header, target, io::empty())
    }

    fn degrade(&mut self, path: &Path, target: &Path, reason: &str) -> io::Result<()> {
        self.warnings.push(Warning::volume_entry_degraded(format!(
            "{} replaced by an empty directory: {}",
            path.display(),
            reason
        )));
        self.append_dir(target, 0o755)
    }
}

#[derive(Debug, Clone)]
enum Part {
    Current,
    Parent,
    Name(OsString),
}

fn parts(path: &Path) -> impl Iterator<Item = Part> + '_ {
    path.components().filter_map(|c| match c {
        Component::CurDir => Some(Part::Current),
        Component::ParentDir => Some(Part::Parent),
        Component::Normal(name) => Some(Part::Name(name.to_os_string())),
        Component::RootDir | Component::Prefix(_) => None,
    })
}

/// Resolve symlink `link` (inside `root`) component by component, failing when
/// any step leaves `root`. The result is never a symlink.
fn resolve_in_root(fs: &dyn Filesystem, root: &Path, link: &Path) -> Result<PathBuf, String> {
    let outside = |p: &Path| format!("symlink target {} is outside {}", p.display(), root.display());

    let relative = link.strip_prefix(root).map_err(|_| outside(link))?;
    let mut resolved: Vec<OsString> = parts(relative)
        .filter_map(|p| match p {
            Part::Name(name) => Some(name),
            _ => None,
        })
        .collect();
    let mut queue: VecDeque<Part> = VecDeque::new();
    // Re-walking the link's own last component triggers the first hop.
    if let Some(last) = resolved.pop() {
        queue.push_back(Part::Name(last));
    }

    let mut hops = 0;
    while let Some(part) = queue.pop_front() {
        match part {
            Part::Current => {}
            Part::Parent => {
                if resolved.pop().is_none() {
                    return Err(outside(link));
                }
            }
            Part::Name(name) => {
                resolved.push(name);
                let current: PathBuf = root.join(resolved.iter().collect::<PathBuf>());
                let kind = fs.entry_kind(&current).map_err(|e| e.to_string())?;
                if kind != EntryKind::Symlink {
                    continue;
                }

                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err("too many levels of symbolic links".to_string());
                }
                let target = fs.read_link(&current).map_err(|e| e.to_string())?;
                resolved.pop();

                let mut next: VecDeque<Part> = if target.is_absolute() {
                    let target = normalize(&target);
                    let inside = target.strip_prefix(root).map_err(|_| outside(&target))?;
                    resolved.clear();
                    parts(inside).collect()
                } else {
                    parts(&target).collect()
                };
                next.extend(queue.drain(..));
                queue = next;
            }
        }
    }

    Ok(root.join(resolved.iter().collect::<PathBuf>()))
}

/// The host path of a bind mount may itself be a symlink; the daemon follows it.
fn follow_root(fs: &dyn Filesystem, root: &Path) -> PathBuf {
    let mut current = root.to_path_buf();
    for _ in 0..MAX_SYMLINK_HOPS {
        if !matches!(fs.entry_kind(&current), Ok(EntryKind::Symlink)) {
            break;
        }
        let Ok(target) = fs.read_link(&current) else {
            break;
        };
        current = match current.parent() {
            Some(parent) if target.is_relative() => normalize(&parent.join(target)),
            _ => normalize(&target),
        };
    }
    current
}

/// Lexically remove `.` and `..` from an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
