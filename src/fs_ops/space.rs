//! Free-space checks against a location's filesystem.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use crate::errors::TierMoveError;
use crate::platform;
use crate::topology::StorageLocation;

/// Filesystem totals for the filesystem holding a path, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub total: i64,
    pub free: i64,
}

pub(crate) fn format_bytes(n: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.1} GiB", f / GB)
    } else if f >= MB {
        format!("{:.1} MiB", f / MB)
    } else if f >= KB {
        format!("{:.1} KiB", f / KB)
    } else {
        format!("{} B", n)
    }
}

/// Query the filesystem holding `path`.
pub fn filesystem_stats(path: &Path) -> Result<FsStats> {
    let (total, free) = platform::fs_stats(path)
        .with_context(|| format!("statvfs '{}'", path.display()))?;
    Ok(FsStats {
        total: i64::try_from(total).unwrap_or(i64::MAX),
        free: i64::try_from(free).unwrap_or(i64::MAX),
    })
}

/// Decide from already-fetched stats. The threshold is `min_free` when positive,
/// otherwise `file_size`; free space must be strictly greater.
pub fn check_free_space(
    path: &Path,
    stats: FsStats,
    min_free: i64,
    file_size: i64,
) -> Result<bool, TierMoveError> {
    if file_size < 0 {
        return Err(TierMoveError::NegativeFileSize(file_size));
    }
    if stats.total <= 0 || stats.free < 0 {
        return Err(TierMoveError::InvalidFsStats {
            path: path.to_path_buf(),
            total: stats.total,
            free: stats.free,
        });
    }
    Ok(stats.free > required_free(min_free, file_size))
}

fn required_free(min_free: i64, file_size: i64) -> i64 {
    if min_free > 0 { min_free } else { file_size }
}

/// Whether `location` can take a file of `file_size` bytes while keeping `min_free`.
pub fn has_enough_free_space(
    location: &StorageLocation,
    min_free: i64,
    file_size: i64,
) -> Result<bool> {
    if file_size < 0 {
        return Err(TierMoveError::NegativeFileSize(file_size).into());
    }
    let stats = filesystem_stats(location.root())?;
    let ok = check_free_space(location.root(), stats, min_free, file_size)?;
    debug!(
        location = %location.name(),
        free = %format_bytes(stats.free),
        size = %format_bytes(file_size),
        min_free,
        ok,
        "capacity check"
    );
    Ok(ok)
}

/// Like [`has_enough_free_space`] but fails with `InsufficientSpace`.
pub fn ensure_free_space(location: &StorageLocation, min_free: i64, file_size: i64) -> Result<()> {
    if file_size < 0 {
        return Err(TierMoveError::NegativeFileSize(file_size).into());
    }
    let stats = filesystem_stats(location.root())?;
    if check_free_space(location.root(), stats, min_free, file_size)? {
        return Ok(());
    }
    Err(TierMoveError::InsufficientSpace {
        location: location.name().to_string(),
        required: required_free(min_free, file_size),
        available: stats.free,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const P: &str = "/mnt/disk1";

    fn stats(total: i64, free: i64) -> FsStats {
        FsStats { total, free }
    }

    #[test]
    fn min_free_takes_precedence_over_size() {
        let p = Path::new(P);
        assert_eq!(check_free_space(p, stats(1000, 500), 400, 900), Ok(true));
        assert_eq!(check_free_space(p, stats(1000, 500), 500, 1), Ok(false));
    }

    #[test]
    fn file_size_is_threshold_without_floor() {
        let p = Path::new(P);
        assert_eq!(check_free_space(p, stats(1000, 500), 0, 499), Ok(true));
        assert_eq!(check_free_space(p, stats(1000, 500), 0, 500), Ok(false));
        assert_eq!(check_free_space(p, stats(1000, 500), -5, 100), Ok(true));
    }

    #[test]
    fn negative_size_is_rejected() {
        let err = check_free_space(Path::new(P), stats(1000, 500), 0, -1).unwrap_err();
        assert!(matches!(err, TierMoveError::NegativeFileSize(-1)));
    }

    #[test]
    fn nonsense_stats_are_rejected() {
        let p = Path::new(P);
        assert!(matches!(
            check_free_space(p, stats(0, 0), 0, 1),
            Err(TierMoveError::InvalidFsStats { .. })
        ));
        assert!(matches!(
            check_free_space(p, stats(100, -1), 0, 1),
            Err(TierMoveError::InvalidFsStats { .. })
        ));
    }

    #[test]
    fn real_filesystem_reports_sane_stats() {
        let td = tempdir().unwrap();
        let s = filesystem_stats(td.path()).unwrap();
        assert!(s.total > 0);
        assert!(s.free >= 0);
        let loc = StorageLocation::disk("tmp", td.path());
        assert!(has_enough_free_space(&loc, 0, 0).unwrap() || s.free == 0);
        let err = ensure_free_space(&loc, i64::MAX, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TierMoveError>(),
            Some(TierMoveError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }
}
