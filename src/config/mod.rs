//! Configuration: XML file -> run settings + storage topology.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{
    CONFIG_ENV, default_config_path, default_log_path, path_has_symlink_ancestor,
    resolve_config_path,
};
pub use types::{Config, LogLevel};
pub use validate::validate_topology;
pub use xml::{load_config_from_xml_path, parse_config_xml};
