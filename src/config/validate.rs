//! Topology validation.
//! Configuration errors are fatal to the run: names must be unique, roots must be
//! absolute, and every reference a share makes must resolve.

use anyhow::{Result, bail};
use std::collections::HashSet;
use tracing::debug;

use crate::allocator::policy_for;
use crate::topology::{CacheMode, Topology};

pub fn validate_topology(topology: &Topology) -> Result<()> {
    let mut names = HashSet::new();
    for loc in topology.disks().iter().chain(topology.pools()) {
        if loc.name().is_empty() {
            bail!("storage location with empty name");
        }
        if !names.insert(loc.name().to_string()) {
            bail!("storage location '{}' is defined twice", loc.name());
        }
        if loc.root().as_os_str().is_empty() || !loc.root().is_absolute() {
            bail!(
                "storage location '{}' root must be an absolute path, got '{}'",
                loc.name(),
                loc.root().display()
            );
        }
    }

    for share in topology.shares() {
        // The name is joined onto every location root.
        if matches!(share.name.as_str(), "" | "." | "..") || share.name.contains('/') {
            bail!("invalid share name '{}'", share.name);
        }
        for pool in [&share.cache_pool, &share.cache_pool2].into_iter().flatten() {
            if topology.pool(pool).is_none() {
                bail!("share '{}' references unknown pool '{}'", share.name, pool);
            }
        }
        if share.use_cache != CacheMode::No && share.cache_pool.is_none() {
            bail!(
                "share '{}' uses cache mode '{}' but has no <cache_pool>",
                share.name,
                share.use_cache
            );
        }
        for disk in share.include.iter().chain(&share.exclude) {
            if topology.disk(disk).is_none() {
                bail!("share '{}' references unknown disk '{}'", share.name, disk);
            }
        }
        policy_for(&share.allocator)?;
    }
    debug!("topology validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Share, StorageLocation};

    fn base() -> Topology {
        let mut t = Topology::new();
        t.add_disk(StorageLocation::disk("disk1", "/mnt/disk1"));
        t.add_pool(StorageLocation::pool("cache", "/mnt/cache"));
        t
    }

    #[test]
    fn accepts_consistent_topology() {
        let mut t = base();
        let mut s = Share::new("media");
        s.use_cache = CacheMode::Yes;
        s.cache_pool = Some("cache".into());
        s.include = vec!["disk1".into()];
        t.add_share(s);
        validate_topology(&t).unwrap();
    }

    #[test]
    fn rejects_duplicate_location_names() {
        let mut t = base();
        t.add_pool(StorageLocation::pool("disk1", "/mnt/other"));
        assert!(validate_topology(&t).unwrap_err().to_string().contains("defined twice"));
    }

    #[test]
    fn rejects_relative_root() {
        let mut t = Topology::new();
        t.add_disk(StorageLocation::disk("disk1", "mnt/disk1"));
        assert!(validate_topology(&t).is_err());
    }

    #[test]
    fn rejects_unknown_disk_and_allocator() {
        let mut t = base();
        let mut s = Share::new("media");
        s.exclude = vec!["disk9".into()];
        t.add_share(s);
        assert!(validate_topology(&t).unwrap_err().to_string().contains("disk9"));

        let mut t = base();
        let mut s = Share::new("media");
        s.allocator = "highwater".into();
        t.add_share(s);
        assert!(validate_topology(&t).is_err());
    }

    #[test]
    fn share_name_must_be_a_single_component() {
        for name in [".", "..", "", "media/tv"] {
            let mut t = base();
            t.add_share(Share::new(name));
            let err = validate_topology(&t).unwrap_err().to_string();
            assert!(err.contains("invalid share name"), "{name:?}: {err}");
        }
    }

    #[test]
    fn cache_mode_needs_a_pool() {
        let mut t = base();
        let mut s = Share::new("appdata");
        s.use_cache = CacheMode::Prefer;
        t.add_share(s);
        assert!(validate_topology(&t).unwrap_err().to_string().contains("cache_pool"));
    }
}
