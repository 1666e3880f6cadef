//! Core configuration types.
//! - Config holds run settings plus the storage topology.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::fs_ops::{MoveOptions, default_workers};
use crate::topology::Topology;

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Stage summaries and completed mutations (default)
    #[default]
    Normal,
    /// Per-entity detail
    Info,
    /// Everything, including probes and state transitions
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// Directive for `EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Quiet => "error",
            LogLevel::Normal => "info",
            LogLevel::Info => "debug",
            LogLevel::Debug => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Runtime configuration used by the mover.
#[derive(Debug, Clone)]
pub struct Config {
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
    /// If true, log planned mutations but do not touch the filesystem
    pub dry_run: bool,
    /// Unlink sources after their group moved completely
    pub remove_source: bool,
    /// Worker threads per move call
    pub workers: usize,
    /// Disks, pools and shares
    pub topology: Topology,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Normal,
            log_file: None,
            dry_run: false,
            remove_source: true,
            workers: default_workers(),
            topology: Topology::new(),
        }
    }
}

impl Config {
    /// Options for the move engine derived from this config.
    pub fn move_options(&self) -> MoveOptions {
        MoveOptions {
            dry_run: self.dry_run,
            remove_source: self.remove_source,
            workers: self.workers.max(1),
        }
    }
}
