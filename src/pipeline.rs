//! Per-share orchestration: discover, allocate, derive paths, validate, move.

use anyhow::{Result, bail};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::allocator::{AllocationPolicy, Allocator, Reservations, allocate, policy_for};
use crate::discovery::discover;
use crate::entity::{Batch, EntityId};
use crate::errors::TierMoveError;
use crate::fs_ops::Mover;
use crate::ledger::ProcessingLedger;
use crate::resolve::establish_paths;
use crate::shutdown;
use crate::topology::{CacheMode, Share, Topology};
use crate::validate::validate;

/// Which way a share's data flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Cache pools to array disks (`use_cache = yes`).
    CacheToArray,
    /// Array disks to the primary cache pool (`use_cache = prefer`).
    ArrayToCache,
}

impl Direction {
    pub fn for_share(share: &Share) -> Option<Self> {
        match share.use_cache {
            CacheMode::Yes => Some(Direction::CacheToArray),
            CacheMode::Prefer => Some(Direction::ArrayToCache),
            CacheMode::No => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::CacheToArray => "cache -> array",
            Direction::ArrayToCache => "array -> cache",
        })
    }
}

/// Counts for one share across all of its source locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareSummary {
    pub share: String,
    pub direction: Option<Direction>,
    /// Top-level groups found by discovery.
    pub discovered: usize,
    /// Groups dropped before the move (no destination, bad paths, failed validation).
    pub dropped: usize,
    /// Entities that reached `Done`.
    pub moved: usize,
    /// Entities that ended `Failed`.
    pub failed: usize,
    /// True when a shutdown request cut the share short.
    pub interrupted: bool,
}

/// Migrate one share in the direction its cache mode asks for.
pub fn migrate_share(
    topology: &Topology,
    share: &Arc<Share>,
    mover: &Mover,
    ledger: &ProcessingLedger,
) -> Result<ShareSummary> {
    let mut summary = ShareSummary {
        share: share.name.clone(),
        ..Default::default()
    };
    let Some(direction) = Direction::for_share(share) else {
        debug!(share = %share.name, "cache mode 'no'; nothing to move");
        return Ok(summary);
    };
    summary.direction = Some(direction);

    let (sources, fixed_target) = match direction {
        Direction::CacheToArray => (topology.cache_pools(share)?, None),
        Direction::ArrayToCache => {
            let pools = topology.cache_pools(share)?;
            let Some(primary) = pools.first().cloned() else {
                bail!("share '{}' prefers cache but names no cache pool", share.name);
            };
            (topology.eligible_disks(share), Some(primary))
        }
    };
    let policy = policy_for(&share.allocator)?;
    info!(share = %share.name, %direction, sources = sources.len(), "migrating share");

    for source in &sources {
        if shutdown::is_requested() {
            summary.interrupted = true;
            break;
        }
        let mut batch = discover(source, share)?;
        summary.discovered += batch.len();
        if batch.is_empty() {
            continue;
        }

        match &fixed_target {
            Some(target) => {
                for root in batch.roots().to_vec() {
                    batch.assign_destination(root, Arc::clone(target));
                }
            }
            None => assign_disks(topology, share, policy.as_ref(), &mut batch),
        }

        let before = batch.len();
        let batch = validate(establish_paths(batch));
        summary.dropped += before - batch.len();

        let report = mover.run(batch, ledger)?;
        summary.moved += report.done();
        summary.failed += report.failed();
    }
    if shutdown::is_requested() {
        summary.interrupted = true;
    }

    info!(
        share = %summary.share,
        discovered = summary.discovered,
        dropped = summary.dropped,
        moved = summary.moved,
        failed = summary.failed,
        "share complete"
    );
    Ok(summary)
}

/// Pick an array disk for every group: the split-level constraint narrows the
/// candidates, then the share's policy chooses by free space less what earlier
/// groups of this batch were already given. Groups left without a destination are
/// dropped later by path derivation.
fn assign_disks(
    topology: &Topology,
    share: &Share,
    policy: &dyn AllocationPolicy,
    batch: &mut Batch,
) {
    let allocator = Allocator::new(topology);
    let eligible = topology.eligible_disks(share);
    let mut reservations = Reservations::new();
    let roots: Vec<EntityId> = batch.roots().to_vec();
    for root in roots {
        let Some(entity) = batch.get(root) else { continue };
        let candidates = match allocator.resolve(entity, share.split_level) {
            Ok(Some(disks)) => disks,
            Ok(None) => eligible.clone(),
            // A file directly in the share directory has nothing to keep together.
            Err(e) if matches!(e.downcast_ref::<TierMoveError>(), Some(TierMoveError::ZeroSplitDepth(_))) => {
                debug!(path = %entity.source_path.display(), "no directory to colocate");
                eligible.clone()
            }
            Err(e) => {
                warn!(path = %entity.source_path.display(), error = %format!("{e:#}"), "allocation failed");
                continue;
            }
        };
        let size = entity.metadata.size;
        let path = entity.source_path.clone();
        match allocate(policy, &candidates, size, share.floor, &mut reservations) {
            Some(disk) => batch.assign_destination(root, disk),
            None => warn!(
                path = %path.display(),
                candidates = ?candidates.iter().map(|d| d.name()).collect::<Vec<_>>(),
                "no candidate disk has room"
            ),
        }
    }
}

/// Every configured share that has something to move.
pub fn migratable_shares(topology: &Topology) -> Vec<Arc<Share>> {
    topology
        .shares()
        .filter(|s| Direction::for_share(s).is_some())
        .cloned()
        .collect()
}
