//! Storage topology: disks, pools and the shares spanning them.
//!
//! Locations and shares are read-only configuration. The only mutable bit is a
//! location's active-transfer flag, claimed through [`StorageLocation::begin_transfer`]
//! and released when the returned guard drops.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::errors::TierMoveError;

/// Whether a location is an array member disk or a cache pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Disk,
    Pool,
}

/// A mounted filesystem that holds share directories.
#[derive(Debug)]
pub struct StorageLocation {
    name: String,
    kind: LocationKind,
    root: PathBuf,
    active: AtomicBool,
}

impl StorageLocation {
    pub fn new(name: impl Into<String>, kind: LocationKind, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            root: root.into(),
            active: AtomicBool::new(false),
        }
    }

    pub fn disk(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::new(name, LocationKind::Disk, root)
    }

    pub fn pool(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::new(name, LocationKind::Pool, root)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_transferring(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the active-transfer flag. Fails with `LocationBusy` if another
    /// batch already holds it.
    pub fn begin_transfer(self: &Arc<Self>) -> Result<TransferGuard, TierMoveError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TierMoveError::LocationBusy(self.name.clone()))?;
        trace!(location = %self.name, "transfer flag claimed");
        Ok(TransferGuard {
            location: Arc::clone(self),
        })
    }
}

impl PartialEq for StorageLocation {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for StorageLocation {}

/// RAII guard held while a batch writes into a location.
#[derive(Debug)]
pub struct TransferGuard {
    location: Arc<StorageLocation>,
}

impl TransferGuard {
    pub fn location(&self) -> &Arc<StorageLocation> {
        &self.location
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.location.active.store(false, Ordering::Release);
        trace!(location = %self.location.name, "transfer flag released");
    }
}

/// How a share uses its cache pool(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Data lives on the array only; the mover leaves it alone.
    #[default]
    No,
    /// New writes land on the cache and are moved to the array.
    Yes,
    /// Data is pulled from the array back onto the cache.
    Prefer,
}

impl CacheMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no" => Some(CacheMode::No),
            "yes" => Some(CacheMode::Yes),
            "prefer" => Some(CacheMode::Prefer),
            _ => None,
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheMode::No => "no",
            CacheMode::Yes => "yes",
            CacheMode::Prefer => "prefer",
        })
    }
}

impl FromStr for CacheMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid cache mode: '{s}'"))
    }
}

/// A named namespace spanning the disks and pools of the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub name: String,
    pub use_cache: CacheMode,
    pub cache_pool: Option<String>,
    pub cache_pool2: Option<String>,
    /// Name of the capacity policy used to pick among candidate disks.
    pub allocator: String,
    /// Directory depth above which colocation is not enforced; negative disables it.
    pub split_level: i32,
    /// Free-space floor in bytes; 0 means "no explicit floor".
    pub floor: i64,
    pub cow_disabled: bool,
    /// Included disks; empty means every disk.
    pub include: Vec<String>,
    /// Excluded disks; always wins over `include`.
    pub exclude: Vec<String>,
}

impl Share {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            use_cache: CacheMode::No,
            cache_pool: None,
            cache_pool2: None,
            allocator: String::from("mostfree"),
            split_level: -1,
            floor: 0,
            cow_disabled: false,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Directory of this share on `location`.
    pub fn dir_on(&self, location: &StorageLocation) -> PathBuf {
        location.root().join(&self.name)
    }

    /// True if `disk` may hold data of this share.
    pub fn allows_disk(&self, disk: &str) -> bool {
        if self.exclude.iter().any(|d| d == disk) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|d| d == disk)
    }
}

/// System-wide set of locations and shares, looked up by name.
#[derive(Debug, Default, Clone)]
pub struct Topology {
    disks: Vec<Arc<StorageLocation>>,
    pools: Vec<Arc<StorageLocation>>,
    shares: BTreeMap<String, Arc<Share>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_disk(&mut self, disk: StorageLocation) -> Arc<StorageLocation> {
        let disk = Arc::new(disk);
        self.disks.push(Arc::clone(&disk));
        disk
    }

    pub fn add_pool(&mut self, pool: StorageLocation) -> Arc<StorageLocation> {
        let pool = Arc::new(pool);
        self.pools.push(Arc::clone(&pool));
        pool
    }

    pub fn add_share(&mut self, share: Share) -> Arc<Share> {
        let share = Arc::new(share);
        self.shares.insert(share.name.clone(), Arc::clone(&share));
        share
    }

    pub fn disks(&self) -> &[Arc<StorageLocation>] {
        &self.disks
    }

    pub fn pools(&self) -> &[Arc<StorageLocation>] {
        &self.pools
    }

    pub fn shares(&self) -> impl Iterator<Item = &Arc<Share>> {
        self.shares.values()
    }

    pub fn disk(&self, name: &str) -> Option<&Arc<StorageLocation>> {
        self.disks.iter().find(|d| d.name() == name)
    }

    pub fn pool(&self, name: &str) -> Option<&Arc<StorageLocation>> {
        self.pools.iter().find(|p| p.name() == name)
    }

    pub fn share(&self, name: &str) -> Result<Arc<Share>, TierMoveError> {
        self.shares
            .get(name)
            .cloned()
            .ok_or_else(|| TierMoveError::UnknownShare(name.to_string()))
    }

    /// Disks the share may use: included set (all by default) minus excluded set,
    /// in configured disk order.
    pub fn eligible_disks(&self, share: &Share) -> Vec<Arc<StorageLocation>> {
        self.disks
            .iter()
            .filter(|d| share.allows_disk(d.name()))
            .cloned()
            .collect()
    }

    /// The share's cache pools (primary first).
    pub fn cache_pools(&self, share: &Share) -> Result<Vec<Arc<StorageLocation>>, TierMoveError> {
        [&share.cache_pool, &share.cache_pool2]
            .into_iter()
            .flatten()
            .map(|name| {
                self.pool(name)
                    .cloned()
                    .ok_or_else(|| TierMoveError::UnknownLocation(name.clone()))
            })
            .collect()
    }
}
