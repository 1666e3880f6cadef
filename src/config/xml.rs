//! XML configuration support.
//! - Reads config.xml with quick_xml + serde into run settings and a `Topology`.
//! - Unknown elements are rejected so typos never silently change behavior.
//! - Scalars are read as text and parsed here, which keeps error messages specific
//!   and tolerates surrounding whitespace.

use anyhow::{Context, Result, anyhow};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use super::types::{Config, LogLevel};
use super::validate::validate_topology;
use crate::topology::{CacheMode, Share, StorageLocation, Topology};

#[derive(Debug, Deserialize)]
#[serde(rename = "config", deny_unknown_fields)]
struct XmlConfig {
    log_level: Option<String>,
    log_file: Option<String>,
    dry_run: Option<String>,
    remove_source: Option<String>,
    workers: Option<String>,
    #[serde(rename = "disk", default)]
    disks: Vec<XmlLocation>,
    #[serde(rename = "pool", default)]
    pools: Vec<XmlLocation>,
    #[serde(rename = "share", default)]
    shares: Vec<XmlShare>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlLocation {
    name: String,
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlShare {
    name: String,
    use_cache: Option<String>,
    cache_pool: Option<String>,
    cache_pool2: Option<String>,
    allocator: Option<String>,
    split_level: Option<String>,
    floor: Option<String>,
    cow_disabled: Option<String>,
    include: Option<String>,
    exclude: Option<String>,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_bool(field: &str, s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(anyhow!("<{field}>: expected true/false, got '{other}'")),
    }
}

fn parse_num<T: FromStr>(field: &str, s: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    s.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("<{field}>: '{}' is not a valid number: {e}", s.trim()))
}

fn parse_list(s: Option<&str>) -> Vec<String> {
    non_empty(s)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn share_from_xml(x: XmlShare) -> Result<Share> {
    let name = x.name.trim().to_string();
    let ctx = |field: &str| format!("share '{name}' <{field}>");
    let mut share = Share::new(name.clone());
    if let Some(v) = non_empty(x.use_cache.as_deref()) {
        share.use_cache = v.parse::<CacheMode>().map_err(|e| anyhow!("{}: {e}", ctx("use_cache")))?;
    }
    share.cache_pool = non_empty(x.cache_pool.as_deref()).map(String::from);
    share.cache_pool2 = non_empty(x.cache_pool2.as_deref()).map(String::from);
    if let Some(v) = non_empty(x.allocator.as_deref()) {
        share.allocator = v.to_ascii_lowercase();
    }
    if let Some(v) = non_empty(x.split_level.as_deref()) {
        share.split_level = parse_num("split_level", v).with_context(|| ctx("split_level"))?;
    }
    if let Some(v) = non_empty(x.floor.as_deref()) {
        share.floor = parse_num("floor", v).with_context(|| ctx("floor"))?;
    }
    if let Some(v) = non_empty(x.cow_disabled.as_deref()) {
        share.cow_disabled = parse_bool("cow_disabled", v).with_context(|| ctx("cow_disabled"))?;
    }
    share.include = parse_list(x.include.as_deref());
    share.exclude = parse_list(x.exclude.as_deref());
    Ok(share)
}

fn xml_to_config(parsed: XmlConfig) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(s) = non_empty(parsed.log_level.as_deref()) {
        cfg.log_level = s.parse::<LogLevel>().map_err(|e| anyhow!("<log_level>: {e}"))?;
    }
    cfg.log_file = non_empty(parsed.log_file.as_deref()).map(PathBuf::from);
    if let Some(s) = non_empty(parsed.dry_run.as_deref()) {
        cfg.dry_run = parse_bool("dry_run", s)?;
    }
    if let Some(s) = non_empty(parsed.remove_source.as_deref()) {
        cfg.remove_source = parse_bool("remove_source", s)?;
    }
    if let Some(s) = non_empty(parsed.workers.as_deref()) {
        cfg.workers = parse_num("workers", s)?;
    }

    let mut topology = Topology::new();
    for d in parsed.disks {
        topology.add_disk(StorageLocation::disk(d.name.trim(), d.path.trim()));
    }
    for p in parsed.pools {
        topology.add_pool(StorageLocation::pool(p.name.trim(), p.path.trim()));
    }
    for s in parsed.shares {
        let share = share_from_xml(s)?;
        if topology.shares().any(|existing| existing.name == share.name) {
            return Err(anyhow!("share '{}' is defined twice", share.name));
        }
        topology.add_share(share);
    }
    validate_topology(&topology)?;
    cfg.topology = topology;
    Ok(cfg)
}

/// Parse and validate a config document.
pub fn parse_config_xml(contents: &str) -> Result<Config> {
    let parsed: XmlConfig = from_xml_str(contents).context("parse config xml")?;
    xml_to_config(parsed)
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    let cfg = parse_config_xml(&contents)
        .with_context(|| format!("load config '{}'", path.display()))?;
    debug!(
        path = %path.display(),
        disks = cfg.topology.disks().len(),
        pools = cfg.topology.pools().len(),
        shares = cfg.topology.shares().count(),
        "config loaded"
    );
    Ok(cfg)
}
