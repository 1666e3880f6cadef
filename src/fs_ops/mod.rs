//! Filesystem side of a move: verified copies, atomic placement, attribute
//! replication, capacity and in-use checks, and the engine that drives them.

mod atomic;
mod attrs;
mod engine;
mod helpers;
mod in_use;
mod io_copy;
pub mod space;
mod util;

pub use engine::{MoveOptions, MoveReport, Mover, default_workers, move_entities};
pub use helpers::{io_error_with_help, io_error_with_help_io};
pub use in_use::{InUseProbe, NeverInUse, ProcFdProbe, StableSizeProbe, default_probe};
pub use io_copy::{CopyReport, copy_verified};
pub use space::{FsStats, check_free_space, ensure_free_space, filesystem_stats, has_enough_free_space};
pub use util::TEMP_SUFFIX;
