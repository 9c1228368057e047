// ABOUTME: Filesystem abstraction for reading bind-mount host trees.
// ABOUTME: The OS implementation never follows symlinks on its own.

use std::io;
use std::path::{Path, PathBuf};

/// What a path is, without following a final symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { mode: u32 },
    Dir { mode: u32 },
    Symlink,
    /// Sockets, FIFOs and devices.
    Other,
}

pub trait Filesystem: Send + Sync {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind>;

    /// Children of a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() { 0o755 } else { 0o644 }
}

impl Filesystem for OsFilesystem {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        let metadata = std::fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();
        Ok(if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir {
                mode: mode_of(&metadata),
            }
        } else if file_type.is_file() {
            EntryKind::File {
                mode: mode_of(&metadata),
            }
        } else {
            EntryKind::Other
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        children.sort();
        Ok(children)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }
}
