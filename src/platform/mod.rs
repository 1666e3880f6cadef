//! Platform helpers. The crate targets Unix only.

mod unix;

pub use unix::{fs_stats, open_log_file_secure_append};
