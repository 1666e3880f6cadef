//! Default path helpers and symlink checks.

use dirs::{config_dir, data_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TIER_MOVE_CONFIG";

/// OS-appropriate default config path.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(mut base) = config_dir() {
        base.push("tier_move");
        base.push("config.xml");
        Some(base)
    } else {
        env::var("HOME").ok().map(|h| {
            PathBuf::from(h)
                .join(".config")
                .join("tier_move")
                .join("config.xml")
        })
    }
}

/// OS-appropriate default log file path (data dir).
pub fn default_log_path() -> Option<PathBuf> {
    data_dir().map(|base| base.join("tier_move").join("tier_move.log"))
}

/// Config file to use: explicit path, then `$TIER_MOVE_CONFIG`, then the default.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Some(p) = env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(p));
    }
    default_config_path()
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn explicit_beats_env() {
        let td = tempdir().unwrap();
        let explicit = td.path().join("a.xml");
        unsafe { env::set_var(CONFIG_ENV, td.path().join("b.xml")) };
        assert_eq!(resolve_config_path(Some(&explicit)), Some(explicit.clone()));
        assert_eq!(resolve_config_path(None), Some(td.path().join("b.xml")));
        unsafe { env::remove_var(CONFIG_ENV) };
    }

    #[test]
    #[serial]
    fn default_path_ends_with_crate_dir() {
        unsafe { env::remove_var(CONFIG_ENV) };
        if let Some(p) = resolve_config_path(None) {
            assert!(p.ends_with("tier_move/config.xml"));
        }
    }

    #[test]
    fn detects_symlinked_ancestor() {
        let td = tempdir().unwrap();
        let real = td.path().join("real");
        fs::create_dir_all(&real).unwrap();
        symlink(&real, td.path().join("link")).unwrap();
        assert!(path_has_symlink_ancestor(&td.path().join("link/x.log")).unwrap());
        assert!(!path_has_symlink_ancestor(&real.join("x.log")).unwrap());
    }
}
