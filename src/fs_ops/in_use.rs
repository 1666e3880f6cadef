//! Detection of sources that another process currently has open.
//!
//! On Linux every other process's `/proc/<pid>/fd` table is scanned and each
//! descriptor is compared to the source by (device, inode). Elsewhere a file is
//! treated as busy when its size keeps changing over a short interval.

use anyhow::Result;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::helpers::io_error_with_help;
use crate::errors::TierMoveError;
use crate::shutdown;

/// Answers whether some other process has `path` open right now.
pub trait InUseProbe: Send + Sync {
    fn is_in_use(&self, path: &Path) -> Result<bool>;
}

/// Scans a procfs-style tree for descriptors referring to the same inode.
#[derive(Debug, Clone)]
pub struct ProcFdProbe {
    proc_root: PathBuf,
}

impl Default for ProcFdProbe {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcFdProbe {
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl InUseProbe for ProcFdProbe {
    fn is_in_use(&self, path: &Path) -> Result<bool> {
        let meta = fs::symlink_metadata(path).map_err(io_error_with_help("stat", path))?;
        // Descriptors never refer to a symlink itself.
        if meta.file_type().is_symlink() {
            return Ok(false);
        }
        let (dev, ino) = (meta.dev(), meta.ino());
        let me = std::process::id();

        let procs = fs::read_dir(&self.proc_root)
            .map_err(io_error_with_help("list processes", &self.proc_root))?;
        for proc_entry in procs.flatten() {
            let name = proc_entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if pid == me {
                continue;
            }
            // Processes exit and fd tables of other users are unreadable; both are skipped.
            let Ok(fds) = fs::read_dir(proc_entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let fd_path = fd.path();
                match fs::read_link(&fd_path) {
                    Ok(target) if target.is_absolute() => {}
                    // pipe:[..], socket:[..], anon_inode:..
                    _ => continue,
                }
                let Ok(m) = fs::metadata(&fd_path) else {
                    continue;
                };
                if m.dev() == dev && m.ino() == ino {
                    debug!(pid, path = %path.display(), "source is open in another process");
                    return Ok(true);
                }
            }
        }
        trace!(path = %path.display(), "source not open elsewhere");
        Ok(false)
    }
}

/// Treats a file as busy while its size is still changing.
#[derive(Debug, Clone)]
pub struct StableSizeProbe {
    pub interval: Duration,
    pub attempts: usize,
}

impl Default for StableSizeProbe {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(150),
            attempts: 2,
        }
    }
}

impl InUseProbe for StableSizeProbe {
    fn is_in_use(&self, path: &Path) -> Result<bool> {
        let meta = fs::symlink_metadata(path).map_err(io_error_with_help("stat", path))?;
        if !meta.is_file() {
            return Ok(false);
        }
        let mut last = meta.len();
        for _ in 0..self.attempts {
            shutdown::check()?;
            std::thread::sleep(self.interval);
            shutdown::check()?;
            let size = fs::metadata(path)
                .map_err(io_error_with_help("stat", path))?
                .len();
            if size == last {
                return Ok(false);
            }
            last = size;
        }
        debug!(path = %path.display(), "source size did not settle");
        Ok(true)
    }
}

/// Probe that never reports a file as busy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverInUse;

impl InUseProbe for NeverInUse {
    fn is_in_use(&self, _path: &Path) -> Result<bool> {
        Ok(false)
    }
}

/// The best probe for the running platform.
pub fn default_probe() -> Arc<dyn InUseProbe> {
    if cfg!(target_os = "linux") && Path::new("/proc/self/fd").is_dir() {
        Arc::new(ProcFdProbe::default())
    } else {
        Arc::new(StableSizeProbe::default())
    }
}

/// Fail with `SourceInUse` when `probe` says `path` is open elsewhere.
pub(crate) fn ensure_not_in_use(probe: &dyn InUseProbe, path: &Path) -> Result<()> {
    if probe.is_in_use(path)? {
        return Err(TierMoveError::SourceInUse(path.to_path_buf()).into());
    }
    Ok(())
}
