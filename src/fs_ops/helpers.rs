//! io::Error adapters that attach the operation, the path and a short hint.
//!
//! Usage:
//!   fs::create_dir(dir).map_err(io_error_with_help("create directory", dir))?;
//!   File::open(p).map_err(io_error_with_help_io("open source", p))?;

use anyhow::anyhow;
use std::io;
use std::path::Path;

fn hint(e: &io::Error) -> Option<&'static str> {
    if let Some(code) = e.raw_os_error() {
        let h = match code {
            libc::EACCES | libc::EPERM => "permission denied; the mover needs ownership rights on both tiers",
            libc::EXDEV => "cross-filesystem; rename only works within one location",
            libc::EBUSY | libc::ETXTBSY => "resource busy; another process holds the file",
            libc::ENOENT => "path not found; it may have been removed during the run",
            libc::EEXIST => "already exists on the destination",
            libc::ENOSPC | libc::EDQUOT => "destination location is full",
            libc::EROFS => "read-only filesystem",
            libc::ELOOP => "too many symbolic link levels",
            libc::ENAMETOOLONG => "path too long for the destination filesystem",
            libc::EMFILE | libc::ENFILE => "out of file descriptors",
            libc::EIO => "I/O error; check the device",
            _ => return None,
        };
        return Some(h);
    }
    match e.kind() {
        io::ErrorKind::PermissionDenied => Some("permission denied"),
        io::ErrorKind::NotFound => Some("path not found"),
        io::ErrorKind::AlreadyExists => Some("already exists on the destination"),
        _ => None,
    }
}

fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);
    if let Some(h) = hint(e) {
        msg.push_str(" (");
        msg.push_str(h);
        msg.push(')');
    }
    msg
}

/// `.map_err` adapter producing an `anyhow::Error`.
pub fn io_error_with_help<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(build_message(op, path, &e))
}

/// `.map_err` adapter that keeps the `io::ErrorKind`.
pub fn io_error_with_help_io<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> io::Error + 'a {
    move |e: io::Error| io::Error::new(e.kind(), build_message(op, path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_op_path_and_hint() {
        let e = io::Error::from_raw_os_error(libc::ENOSPC);
        let err = io_error_with_help("write", Path::new("/mnt/disk1/x"))(e);
        let s = err.to_string();
        assert!(s.starts_with("write '/mnt/disk1/x'"));
        assert!(s.contains("destination location is full"));
    }

    #[test]
    fn io_variant_preserves_kind() {
        let e = io::Error::new(io::ErrorKind::NotFound, "gone");
        let out = io_error_with_help_io("open", Path::new("/a"))(e);
        assert_eq!(out.kind(), io::ErrorKind::NotFound);
        assert!(out.to_string().contains("open '/a'"));
    }
}
