//! Metadata accessor.
//! Captures the identity of a filesystem path once (lstat semantics: symlinks are
//! never followed) so later stages work from a consistent snapshot.

use anyhow::Result;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::fs_ops::io_error_with_help;

/// Broad type of a captured entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// FIFO, socket or device node.
    Special,
}

/// Identity of a path captured at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub dev: u64,
    pub inode: u64,
    /// Permission bits including setuid/setgid/sticky.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Seconds/nanoseconds since the epoch.
    pub mtime: (i64, u32),
    pub atime: (i64, u32),
    /// Inode change time; the closest POSIX offers to a creation time.
    pub ctime: (i64, u32),
    pub size: i64,
    pub kind: EntryKind,
    /// Raw target of a symlink, byte-for-byte.
    pub link_target: Option<OsString>,
}

impl EntryMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub(crate) fn from_fs(meta: &fs::Metadata, link_target: Option<OsString>) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        };
        Self {
            dev: meta.dev(),
            inode: meta.ino(),
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: (meta.mtime(), meta.mtime_nsec() as u32),
            atime: (meta.atime(), meta.atime_nsec() as u32),
            ctime: (meta.ctime(), meta.ctime_nsec() as u32),
            size: meta.size() as i64,
            kind,
            link_target,
        }
    }
}

/// Stat `path` without following symlinks, reading the link target if it is one.
pub fn stat_entry(path: &Path) -> Result<EntryMetadata> {
    let meta = fs::symlink_metadata(path).map_err(io_error_with_help("stat", path))?;
    let target = if meta.file_type().is_symlink() {
        Some(
            fs::read_link(path)
                .map_err(io_error_with_help("read symlink", path))?
                .into_os_string(),
        )
    } else {
        None
    };
    Ok(EntryMetadata::from_fs(&meta, target))
}
