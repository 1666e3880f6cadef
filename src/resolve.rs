//! Destination path derivation.
//! Rebases an entity and every ancestor directory from the source location's root
//! onto the destination location's root. A failure anywhere in a group drops the
//! whole group (canonical entity plus all of its hardlinks and symlinks).

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::entity::{Batch, EntityId, MigrationEntity};
use crate::errors::TierMoveError;

/// Fill in destination paths for every group, keeping only groups that succeed.
pub fn establish_paths(mut batch: Batch) -> Batch {
    let mut keep: HashSet<EntityId> = HashSet::new();
    for root in batch.roots().to_vec() {
        let mut ok = true;
        for id in batch.group(root) {
            let Some(entity) = batch.get_mut(id) else {
                ok = false;
                break;
            };
            if let Err(e) = establish_entity_paths(entity) {
                warn!(
                    path = %entity.source_path.display(),
                    error = %format!("{e:#}"),
                    "cannot derive destination paths; dropping group"
                );
                ok = false;
                break;
            }
        }
        if ok {
            keep.insert(root);
        }
    }
    batch.retain_roots(|_, id| keep.contains(&id));
    batch
}

/// Derive destination paths for one entity and its ancestor chain.
/// The destination location must already be assigned.
pub fn establish_entity_paths(entity: &mut MigrationEntity) -> Result<()> {
    let dest = entity
        .destination
        .clone()
        .ok_or_else(|| TierMoveError::DestinationUnset(entity.source_path.clone()))?;
    if *dest == *entity.source {
        bail!(
            "destination location '{}' is the source location",
            dest.name()
        );
    }
    let from = entity.source.root().to_path_buf();
    entity.destination_path = Some(rebase(&from, dest.root(), &entity.source_path)?);
    for node in entity.ancestors.descend_mut() {
        node.destination_path = Some(rebase(&from, dest.root(), &node.source_path)?);
    }
    Ok(())
}

fn rebase(from_root: &Path, to_root: &Path, path: &Path) -> Result<PathBuf> {
    let rel = path.strip_prefix(from_root).with_context(|| {
        format!(
            "{} is not under source root {}",
            path.display(),
            from_root.display()
        )
    })?;
    Ok(to_root.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover;
    use crate::topology::{Share, StorageLocation};
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn paths_are_rebased_onto_destination_root() {
        let td = tempdir().unwrap();
        let cache = Arc::new(StorageLocation::pool("cache", td.path().join("cache")));
        let disk = Arc::new(StorageLocation::disk("disk1", td.path().join("disk1")));
        let share = Arc::new(Share::new("media"));
        fs::create_dir_all(cache.root().join("media/TV")).unwrap();
        fs::write(cache.root().join("media/TV/ep1.mkv"), b"e").unwrap();

        let mut batch = discover(&cache, &share).unwrap();
        let root = batch.roots()[0];
        batch.assign_destination(root, Arc::clone(&disk));
        let batch = establish_paths(batch);
        assert_eq!(batch.len(), 1);

        let e = batch.get(root).unwrap();
        assert_eq!(e.destination_path.as_deref(), Some(disk.root().join("media/TV/ep1.mkv").as_path()));
        let dests: Vec<_> = e.ancestors.descend().map(|a| a.destination_path.clone().unwrap()).collect();
        assert_eq!(dests, vec![disk.root().join("media"), disk.root().join("media/TV")]);
    }

    #[test]
    fn group_with_unassigned_dependent_is_dropped_whole() {
        let td = tempdir().unwrap();
        let cache = Arc::new(StorageLocation::pool("cache", td.path().join("cache")));
        let disk = Arc::new(StorageLocation::disk("disk1", td.path().join("disk1")));
        let share = Arc::new(Share::new("media"));
        let base = cache.root().join("media");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("a"), b"a").unwrap();
        fs::hard_link(base.join("a"), base.join("b")).unwrap();
        fs::write(base.join("solo"), b"s").unwrap();

        let mut batch = discover(&cache, &share).unwrap();
        assert_eq!(batch.len(), 2);
        for root in batch.roots().to_vec() {
            batch.assign_destination(root, Arc::clone(&disk));
        }
        // Knock the destination off the hardlink dependent only.
        let canonical = batch
            .roots()
            .iter()
            .copied()
            .find(|id| !batch.get(*id).unwrap().hardlinks.is_empty())
            .unwrap();
        let dep = batch.get(canonical).unwrap().hardlinks[0];
        batch.get_mut(dep).unwrap().destination = None;

        let batch = establish_paths(batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(batch.roots()[0]).unwrap().source_path, base.join("solo"));
    }

    #[test]
    fn missing_destination_is_an_error() {
        let td = tempdir().unwrap();
        let cache = Arc::new(StorageLocation::pool("cache", td.path().join("cache")));
        let share = Arc::new(Share::new("media"));
        fs::create_dir_all(cache.root().join("media")).unwrap();
        fs::write(cache.root().join("media/x"), b"x").unwrap();
        let mut batch = discover(&cache, &share).unwrap();
        let root = batch.roots()[0];
        let err = establish_entity_paths(batch.get_mut(root).unwrap()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TierMoveError>(),
            Some(TierMoveError::DestinationUnset(_))
        ));
    }
}
