//! Discovery of migratable entries under a share.
//!
//! Walks `<location root>/<share>` and produces one entity per non-directory entry
//! and per empty directory. Entities sharing an inode are grouped behind the first
//! one seen; symlinks whose target is another discovered entity are attached to
//! that entity. Every entity gets its ancestor chain back to the share directory.
//!
//! Walk errors on individual paths are logged and skipped. Failing to stat a
//! discovered path or one of its ancestors aborts discovery for the share.

use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::entity::{AncestorChain, AncestorDirectory, Batch, EntityId, MigrationEntity};
use crate::meta::{EntryMetadata, stat_entry};
use crate::topology::{Share, StorageLocation};

/// Discover every migratable entity of `share` on `source`.
pub fn discover(source: &Arc<StorageLocation>, share: &Arc<Share>) -> Result<Batch> {
    let share_dir = share.dir_on(source);
    let mut batch = Batch::new();

    match fs::symlink_metadata(&share_dir) {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            warn!(path = %share_dir.display(), "share path is not a directory; skipping");
            return Ok(batch);
        }
        Err(_) => {
            debug!(share = %share.name, location = %source.name(), "share not present on location");
            return Ok(batch);
        }
    }

    for path in walk_leaves(&share_dir) {
        let metadata = stat_entry(&path)
            .with_context(|| format!("discover share '{}' on '{}'", share.name, source.name()))?;
        batch.insert(MigrationEntity::new(
            Arc::clone(share),
            Arc::clone(source),
            path,
            metadata,
        ));
    }

    group_hardlinks(&mut batch);
    classify_symlinks(&mut batch);

    let mut stat_cache: HashMap<PathBuf, EntryMetadata> = HashMap::new();
    let ids: Vec<EntityId> = batch.entities().iter().map(|e| e.id).collect();
    for id in ids {
        let Some(entity) = batch.get(id) else { continue };
        let chain = build_ancestors(&share_dir, &entity.source_path, &mut stat_cache)
            .with_context(|| format!("ancestor chain for {}", entity.source_path.display()))?;
        if let Some(entity) = batch.get_mut(id) {
            entity.ancestors = chain;
        }
    }

    let roots: Vec<EntityId> = batch
        .entities()
        .iter()
        .filter(|e| !e.is_hardlink() && !e.is_internal_symlink())
        .map(|e| e.id)
        .collect();
    for id in roots {
        batch.add_root(id);
    }

    info!(
        share = %share.name,
        location = %source.name(),
        entities = batch.entities().len(),
        groups = batch.len(),
        "discovery complete"
    );
    Ok(batch)
}

/// Every non-directory entry and every empty directory below `share_dir`.
/// Emptiness is checked against the live filesystem during the walk.
fn walk_leaves(share_dir: &Path) -> Vec<PathBuf> {
    let mut leaves = Vec::new();
    for entry in WalkDir::new(share_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping path during walk");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            match fs::read_dir(entry.path()) {
                Ok(mut rd) => {
                    if rd.next().is_none() {
                        leaves.push(entry.into_path());
                    }
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot list directory; skipping");
                }
            }
        } else {
            leaves.push(entry.into_path());
        }
    }
    leaves
}

/// First entity seen for a (device, inode) pair is canonical; the rest hang off it.
fn group_hardlinks(batch: &mut Batch) {
    let mut canonical: HashMap<(u64, u64), EntityId> = HashMap::new();
    let mut links = Vec::new();
    for e in batch.entities() {
        let key = (e.metadata.dev, e.metadata.inode);
        match canonical.get(&key) {
            Some(&first) => links.push((first, e.id)),
            None => {
                canonical.insert(key, e.id);
            }
        }
    }
    for (first, dependent) in links {
        debug!(
            canonical = first.index(),
            dependent = dependent.index(),
            "hardlink grouped"
        );
        batch.link_hardlink(first, dependent);
    }
}

/// Attach symlinks whose target is a discovered, non-link entity to that entity.
fn classify_symlinks(batch: &mut Batch) {
    let targets: HashMap<PathBuf, EntityId> = batch
        .entities()
        .iter()
        .filter(|e| !e.is_hardlink() && !e.metadata.is_symlink())
        .map(|e| (e.source_path.clone(), e.id))
        .collect();

    let mut links = Vec::new();
    for e in batch.entities() {
        if !e.metadata.is_symlink() || e.is_hardlink() {
            continue;
        }
        let Some(raw) = e.metadata.link_target.as_deref() else {
            continue;
        };
        let resolved = resolve_link_target(&e.source_path, Path::new(raw));
        if let Some(&target) = targets.get(&resolved) {
            links.push((target, e.id));
        }
    }
    for (target, dependent) in links {
        batch.link_symlink(target, dependent);
    }
}

/// Resolve a raw symlink target against the link's directory, lexically.
pub(crate) fn resolve_link_target(link: &Path, raw: &Path) -> PathBuf {
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        link.parent().unwrap_or(Path::new("/")).join(raw)
    };
    let mut out = PathBuf::new();
    for c in joined.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Walk from the entity's parent up to and including the share directory.
fn build_ancestors(
    share_dir: &Path,
    path: &Path,
    cache: &mut HashMap<PathBuf, EntryMetadata>,
) -> Result<AncestorChain> {
    let mut nodes = Vec::new();
    let mut dir = path.parent();
    loop {
        let d = dir.ok_or_else(|| {
            anyhow!(
                "{} is not below share directory {}",
                path.display(),
                share_dir.display()
            )
        })?;
        let relative = match d.strip_prefix(share_dir) {
            Ok(r) => r.to_path_buf(),
            Err(_) => bail!(
                "{} is not below share directory {}",
                path.display(),
                share_dir.display()
            ),
        };
        let metadata = match cache.get(d) {
            Some(m) => m.clone(),
            None => {
                let m = stat_entry(d)?;
                cache.insert(d.to_path_buf(), m.clone());
                m
            }
        };
        nodes.push(AncestorDirectory {
            source_path: d.to_path_buf(),
            relative_path: relative,
            metadata,
            destination_path: None,
        });
        if d == share_dir {
            break;
        }
        dir = d.parent();
    }
    Ok(AncestorChain::from_deepest_first(nodes))
}
