use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to a destination path while its content is being written.
pub const TEMP_SUFFIX: &str = ".tier_move.part";

/// `<dest><TEMP_SUFFIX>`, next to the destination so the final rename stays on one filesystem.
pub(super) fn temp_path_for(dest: &Path) -> PathBuf {
    let mut s: OsString = dest.as_os_str().to_owned();
    s.push(TEMP_SUFFIX);
    PathBuf::from(s)
}

pub(super) fn fsync_dir(dir: &Path) -> io::Result<()> {
    let f = File::open(dir)?;
    f.sync_all()
}
