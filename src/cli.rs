//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug and wins over it.
//! - Flags override values from config.xml; unset flags leave the config alone.

use clap::{Parser, ValueHint};
use std::path::PathBuf;

use crate::config::types::{Config, LogLevel};

/// Move share data between cache pools and array disks.
/// CLI flags override config values loaded from XML.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Move share data between cache pools and array disks, preserving links and ownership"
)]
pub struct Args {
    /// Config file (defaults to $TIER_MOVE_CONFIG, then the per-user config dir).
    #[arg(short = 'c', long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Only migrate the named share; repeat for several. Default: every share with a cache mode.
    #[arg(short = 's', long = "share", value_name = "NAME")]
    pub shares: Vec<String>,

    /// Log what would be done, but do not modify the filesystem.
    #[arg(long, help = "Show what would be done, but do not modify files/directories")]
    pub dry_run: bool,

    /// Leave sources in place after a verified move.
    #[arg(long, help = "Keep source entries after they were moved and verified")]
    pub keep_source: bool,

    /// Worker threads per move run.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(
        short = 'd',
        long,
        help = "Enable debug logging (shorthand for --log-level debug)"
    )]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Also write logs to this file.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Emit logs in structured JSON (includes timestamp, level, and structured fields).
    #[arg(long, help = "Emit logs in structured JSON")]
    pub json: bool,

    /// Write the processing ledger as JSON lines to this file when the run ends.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub ledger: Option<PathBuf>,

    /// Print the config file location that would be used, then exit.
    #[arg(long, help = "Print the config file location used by tier_move and exit")]
    pub print_config: bool,
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(path) = &self.log_file {
            cfg.log_file = Some(path.clone());
        }
        if self.dry_run {
            cfg.dry_run = true;
        }
        if self.keep_source {
            cfg.remove_source = false;
        }
        if let Some(n) = self.workers {
            cfg.workers = n;
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
