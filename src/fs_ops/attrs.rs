//! Ownership, permission and timestamp replication onto destination entries.
//! - Owner/group and mode are mandatory: failures propagate.
//! - Timestamps and xattrs are best-effort: failures are logged and ignored.
//! - Symlinks only get their owner/group replicated (lchown); their mode is fixed.

use anyhow::Result;
use filetime::{FileTime, set_file_times, set_symlink_file_times};
use std::fs;
use std::os::unix::fs::{PermissionsExt, chown, lchown};
use std::path::Path;
use tracing::{trace, warn};

use super::helpers::io_error_with_help;
use crate::meta::EntryMetadata;

/// chown then chmod; the order keeps setuid/setgid bits from being cleared.
pub(super) fn apply_owner_and_mode(dest: &Path, meta: &EntryMetadata) -> Result<()> {
    chown(dest, Some(meta.uid), Some(meta.gid)).map_err(io_error_with_help("chown", dest))?;
    fs::set_permissions(dest, fs::Permissions::from_mode(meta.mode))
        .map_err(io_error_with_help("chmod", dest))?;
    trace!(path = %dest.display(), uid = meta.uid, gid = meta.gid, mode = format!("{:o}", meta.mode), "owner and mode applied");
    Ok(())
}

pub(super) fn apply_symlink_owner(dest: &Path, meta: &EntryMetadata) -> Result<()> {
    lchown(dest, Some(meta.uid), Some(meta.gid)).map_err(io_error_with_help("lchown", dest))?;
    trace!(path = %dest.display(), uid = meta.uid, gid = meta.gid, "symlink owner applied");
    Ok(())
}

pub(super) fn preserve_times(dest: &Path, meta: &EntryMetadata) {
    let at = FileTime::from_unix_time(meta.atime.0, meta.atime.1);
    let mt = FileTime::from_unix_time(meta.mtime.0, meta.mtime.1);
    let res = if meta.is_symlink() {
        set_symlink_file_times(dest, at, mt)
    } else {
        set_file_times(dest, at, mt)
    };
    match res {
        Ok(()) => trace!(path = %dest.display(), "set atime/mtime on destination"),
        Err(e) => warn!(path = %dest.display(), error = %e, "failed to set atime/mtime on destination"),
    }
}

/// Copy extended attributes; requires the `xattrs` feature, otherwise a no-op.
pub(super) fn preserve_xattrs(src: &Path, dest: &Path) {
    #[cfg(feature = "xattrs")]
    {
        let names = match xattr::list(src) {
            Ok(n) => n,
            Err(e) => {
                warn!(src = %src.display(), error = %e, "failed to list xattrs; continuing");
                return;
            }
        };
        for name in names {
            let name_disp = name.to_string_lossy().into_owned();
            match xattr::get(src, &name) {
                Ok(value) => {
                    let value = value.unwrap_or_default();
                    if let Err(e) = xattr::set(dest, &name, &value) {
                        warn!(dest = %dest.display(), xattr = %name_disp, error = %e, "failed to set xattr");
                    } else {
                        trace!(dest = %dest.display(), xattr = %name_disp, size = value.len(), "preserved xattr");
                    }
                }
                Err(e) => {
                    warn!(src = %src.display(), xattr = %name_disp, error = %e, "failed to read xattr");
                }
            }
        }
    }
    #[cfg(not(feature = "xattrs"))]
    {
        let _ = (src, dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::stat_entry;
    use std::os::unix::fs::{MetadataExt, symlink};
    use tempfile::tempdir;

    #[test]
    fn mode_and_owner_follow_source() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let dest = td.path().join("dest");
        fs::write(&src, b"s").unwrap();
        fs::write(&dest, b"s").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let meta = stat_entry(&src).unwrap();

        apply_owner_and_mode(&dest, &meta).unwrap();
        let got = fs::metadata(&dest).unwrap();
        assert_eq!(got.mode() & 0o7777, 0o640);
        assert_eq!(got.uid(), meta.uid);
        assert_eq!(got.gid(), meta.gid);
    }

    #[test]
    fn times_follow_source() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let dest = td.path().join("dest");
        fs::write(&src, b"s").unwrap();
        fs::write(&dest, b"s").unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        let meta = stat_entry(&src).unwrap();
        preserve_times(&dest, &meta);
        assert_eq!(fs::metadata(&dest).unwrap().mtime(), 1_600_000_000);
    }

    #[test]
    fn symlink_owner_does_not_touch_target() {
        let td = tempdir().unwrap();
        let target = td.path().join("target");
        fs::write(&target, b"t").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o600)).unwrap();
        let link = td.path().join("link");
        symlink(&target, &link).unwrap();
        let meta = stat_entry(&link).unwrap();

        apply_symlink_owner(&link, &meta).unwrap();
        preserve_times(&link, &meta);
        assert_eq!(fs::metadata(&target).unwrap().mode() & 0o777, 0o600);
    }
}
