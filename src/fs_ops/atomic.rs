//! Final placement of a fully written temporary file.
//! - Refuses to replace anything already at the destination.
//! - Renames within the destination filesystem.
//! - Best-effort fsync of the parent directory afterwards.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::trace;

use crate::errors::TierMoveError;

pub(super) fn rename_into_place(tmp: &Path, dest: &Path) -> Result<()> {
    // rename(2) would silently replace an entry created since the copy began.
    if fs::symlink_metadata(dest).is_ok() {
        return Err(TierMoveError::DestinationExists(dest.to_path_buf()).into());
    }

    fs::rename(tmp, dest)
        .with_context(|| format!("atomic rename '{}' -> '{}'", tmp.display(), dest.display()))?;

    if let Some(parent) = dest.parent() {
        if let Err(e) = super::util::fsync_dir(parent) {
            trace!(dir = %parent.display(), error = %e, "directory fsync failed after rename");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renames_when_destination_is_free() {
        let td = tempdir().unwrap();
        let tmp = td.path().join("f.part");
        let dest = td.path().join("f");
        fs::write(&tmp, b"data").unwrap();
        rename_into_place(&tmp, &dest).unwrap();
        assert!(!tmp.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"data");
    }

    #[test]
    fn refuses_to_clobber() {
        let td = tempdir().unwrap();
        let tmp = td.path().join("f.part");
        let dest = td.path().join("f");
        fs::write(&tmp, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();
        let err = rename_into_place(&tmp, &dest).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TierMoveError>(),
            Some(TierMoveError::DestinationExists(_))
        ));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }
}
