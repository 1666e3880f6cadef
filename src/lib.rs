//! Core library for `tier_move`.
//!
//! Moves the contents of a share between cache pools and array disks:
//! discovery groups hardlinks and symlinks with the file they depend on, the
//! allocator keeps split-level siblings on one disk, and the move engine copies
//! with end-to-end digests before anything at the source is removed.

#[cfg(not(unix))]
compile_error!("tier_move relies on Unix ownership, inode and statvfs semantics");

pub mod allocator;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod entity;
pub mod errors;
pub mod fs_ops;
pub mod ledger;
pub mod meta;
pub mod output;
pub mod pipeline;
pub mod platform;
pub mod resolve;
pub mod shutdown;
pub mod topology;
pub mod validate;

pub use allocator::{
    AllocationPolicy, Allocator, FillUp, MostFree, Reservations, allocate, policy_for,
};
pub use config::types::{Config, LogLevel};
pub use config::{
    default_config_path, default_log_path, load_config_from_xml_path, parse_config_xml,
    path_has_symlink_ancestor, resolve_config_path,
};
pub use discovery::discover;
pub use entity::{Batch, EntityId, MigrationEntity, MoveState, Placement};
pub use errors::{TierMoveError, ValidationFailure};
pub use fs_ops::{MoveOptions, MoveReport, Mover, move_entities};
pub use ledger::{LedgerEntry, LedgerKind, ProcessingLedger};
pub use pipeline::{Direction, ShareSummary, migratable_shares, migrate_share};
pub use resolve::establish_paths;
pub use topology::{CacheMode, LocationKind, Share, StorageLocation, Topology};
pub use validate::{check_group, validate};
