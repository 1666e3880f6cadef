//! Destination disk selection.
//!
//! Two layers:
//! - [`Allocator::resolve`] finds the disks a group must stay on because they
//!   already hold its deepest existing directory below the share's split level.
//! - An [`AllocationPolicy`] picks one disk among those candidates (or among all
//!   eligible disks when there is no constraint) by free space.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::entity::MigrationEntity;
use crate::errors::TierMoveError;
use crate::fs_ops::space::{FsStats, check_free_space, filesystem_stats};
use crate::topology::{StorageLocation, Topology};

/// Split-level candidate resolution over a topology's disks.
pub struct Allocator<'a> {
    topology: &'a Topology,
}

impl<'a> Allocator<'a> {
    pub fn new(topology: &'a Topology) -> Self {
        Self { topology }
    }

    /// Disks the entity is constrained to, or `None` when any eligible disk will do.
    ///
    /// The entity's directory is taken relative to its share directory. Deeper
    /// prefixes of that path are tried first; the first depth at which at least
    /// one eligible disk already has the directory returns every disk matching
    /// there. Prefixes at or above `max_split_level` are never tried.
    pub fn resolve(
        &self,
        entity: &MigrationEntity,
        max_split_level: i32,
    ) -> Result<Option<Vec<Arc<StorageLocation>>>> {
        let share_dir = entity.share.dir_on(&entity.source);
        let rel = entity.dir().strip_prefix(&share_dir).with_context(|| {
            format!(
                "{} is not below share directory {}",
                entity.source_path.display(),
                share_dir.display()
            )
        })?;
        if max_split_level < 0 {
            return Ok(None);
        }
        let components: Vec<&OsStr> = rel.components().map(|c| c.as_os_str()).collect();
        let depth = components.len();
        if depth == 0 {
            return Err(TierMoveError::ZeroSplitDepth(entity.source_path.clone()).into());
        }
        let level = max_split_level as usize;
        if depth <= level {
            trace!(path = %entity.source_path.display(), depth, level, "above split level; unconstrained");
            return Ok(None);
        }

        let disks = self.topology.eligible_disks(&entity.share);
        for i in (level + 1..=depth).rev() {
            let prefix: PathBuf = components[..i].iter().collect();
            let matches: Vec<Arc<StorageLocation>> = disks
                .iter()
                .filter(|d| {
                    fs::symlink_metadata(entity.share.dir_on(d).join(&prefix))
                        .map(|m| m.is_dir())
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if !matches.is_empty() {
                debug!(
                    path = %entity.source_path.display(),
                    prefix = %prefix.display(),
                    disks = ?matches.iter().map(|d| d.name()).collect::<Vec<_>>(),
                    "split-level constraint"
                );
                return Ok(Some(matches));
            }
        }
        Ok(None)
    }
}

/// Final choice among candidate disks, given their current filesystem stats.
pub trait AllocationPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `candidates` keeps configuration order. Returns `None` when no candidate
    /// can take `size` bytes while honoring `floor`.
    fn choose(
        &self,
        candidates: &[(Arc<StorageLocation>, FsStats)],
        size: i64,
        floor: i64,
    ) -> Option<Arc<StorageLocation>>;
}

fn fits(location: &StorageLocation, stats: FsStats, size: i64, floor: i64) -> bool {
    match check_free_space(location.root(), stats, floor, size) {
        Ok(ok) => ok,
        Err(e) => {
            warn!(location = %location.name(), error = %e, "skipping candidate");
            false
        }
    }
}

/// Candidate with the most free bytes.
#[derive(Debug, Default)]
pub struct MostFree;

impl AllocationPolicy for MostFree {
    fn name(&self) -> &'static str {
        "mostfree"
    }

    fn choose(
        &self,
        candidates: &[(Arc<StorageLocation>, FsStats)],
        size: i64,
        floor: i64,
    ) -> Option<Arc<StorageLocation>> {
        candidates
            .iter()
            .filter(|(loc, stats)| fits(loc, *stats, size, floor))
            // max_by_key keeps the last maximum; reverse so ties go to the earlier disk.
            .rev()
            .max_by_key(|(_, stats)| stats.free)
            .map(|(loc, _)| Arc::clone(loc))
    }
}

/// First candidate in configuration order that fits.
#[derive(Debug, Default)]
pub struct FillUp;

impl AllocationPolicy for FillUp {
    fn name(&self) -> &'static str {
        "fillup"
    }

    fn choose(
        &self,
        candidates: &[(Arc<StorageLocation>, FsStats)],
        size: i64,
        floor: i64,
    ) -> Option<Arc<StorageLocation>> {
        candidates
            .iter()
            .find(|(loc, stats)| fits(loc, *stats, size, floor))
            .map(|(loc, _)| Arc::clone(loc))
    }
}

/// Policy registered under `name` (case-insensitive).
pub fn policy_for(name: &str) -> Result<Box<dyn AllocationPolicy>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "mostfree" => Ok(Box::new(MostFree)),
        "fillup" => Ok(Box::new(FillUp)),
        other => bail!("unknown allocator '{other}' (expected mostfree or fillup)"),
    }
}

/// Bytes already promised to each location earlier in the same allocation pass.
/// Copies only start after every group is assigned, so `statvfs` alone would
/// show every group the same free space.
#[derive(Debug, Default, Clone)]
pub struct Reservations {
    assigned: HashMap<String, i64>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, location: &StorageLocation, bytes: i64) {
        *self.assigned.entry(location.name().to_string()).or_insert(0) += bytes.max(0);
    }

    pub fn assigned(&self, location: &StorageLocation) -> i64 {
        self.assigned.get(location.name()).copied().unwrap_or(0)
    }
}

/// Read stats for each candidate and let `policy` pick one, then reserve `size`
/// on the chosen location. Candidates whose filesystem cannot be queried are skipped.
pub fn allocate(
    policy: &dyn AllocationPolicy,
    candidates: &[Arc<StorageLocation>],
    size: i64,
    floor: i64,
    reservations: &mut Reservations,
) -> Option<Arc<StorageLocation>> {
    let with_stats: Vec<(Arc<StorageLocation>, FsStats)> = candidates
        .iter()
        .filter_map(|loc| match filesystem_stats(loc.root()) {
            Ok(s) => Some((Arc::clone(loc), s)),
            Err(e) => {
                warn!(location = %loc.name(), error = %format!("{e:#}"), "cannot read filesystem stats");
                None
            }
        })
        .collect();
    allocate_from(policy, with_stats, size, floor, reservations)
}

fn allocate_from(
    policy: &dyn AllocationPolicy,
    mut with_stats: Vec<(Arc<StorageLocation>, FsStats)>,
    size: i64,
    floor: i64,
    reservations: &mut Reservations,
) -> Option<Arc<StorageLocation>> {
    for (loc, stats) in &mut with_stats {
        stats.free = (stats.free - reservations.assigned(loc)).max(0);
    }
    let chosen = policy.choose(&with_stats, size, floor);
    if let Some(loc) = &chosen {
        reservations.reserve(loc, size);
    }
    debug!(
        policy = policy.name(),
        size,
        floor,
        chosen = ?chosen.as_ref().map(|l| l.name()),
        "allocation"
    );
    chosen
}
