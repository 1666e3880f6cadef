//! Move engine.
//!
//! Each canonical entity walks the same sequence of states:
//!
//!   Pending -> DirsEnsured -> ContentPlaced -> PermissionsApplied -> Done
//!
//! and any step may divert it to `Failed`. Dependents (hardlinks first, then
//! symlinks) are only attempted once their canonical entity is `Done`; their own
//! failures are logged and do not touch the canonical entity.
//!
//! Groups are independent and run on a rayon pool. Every destination location in
//! the batch is claimed for the duration of the run, so two runs can never write
//! to the same location at once.

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use std::fs::{self, DirBuilder};
use std::collections::HashSet;
use std::io;
use std::os::unix::fs::{DirBuilderExt, symlink};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::attrs;
use super::helpers::io_error_with_help;
use super::in_use::{InUseProbe, default_probe, ensure_not_in_use};
use super::io_copy::copy_verified;
use super::space::ensure_free_space;
use crate::entity::{Batch, EntityId, MigrationEntity, MoveState, Placement};
use crate::errors::TierMoveError;
use crate::ledger::{LedgerKind, ProcessingLedger};
use crate::shutdown;
use crate::topology::{StorageLocation, TransferGuard};

/// Knobs for one engine run.
#[derive(Debug, Clone)]
pub struct MoveOptions {
    /// Log every mutation instead of performing it.
    pub dry_run: bool,
    /// Unlink sources once every member of a group reached `Done`.
    pub remove_source: bool,
    /// Size of the worker pool.
    pub workers: usize,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            remove_source: true,
            workers: default_workers(),
        }
    }
}

/// Available parallelism, capped at 4.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

/// Final states of a finished run.
#[derive(Debug)]
pub struct MoveReport {
    batch: Batch,
}

impl MoveReport {
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn into_batch(self) -> Batch {
        self.batch
    }

    pub fn state(&self, id: EntityId) -> Option<&MoveState> {
        self.batch.get(id).map(|e| &e.state)
    }

    /// Entities (canonical and dependent) that reached `Done`.
    pub fn done(&self) -> usize {
        self.count(MoveState::is_done)
    }

    pub fn failed(&self) -> usize {
        self.count(MoveState::is_failed)
    }

    fn count(&self, pred: impl Fn(&MoveState) -> bool) -> usize {
        self.batch
            .roots()
            .iter()
            .flat_map(|&r| self.batch.group(r))
            .filter_map(|id| self.batch.get(id))
            .filter(|e| pred(&e.state))
            .count()
    }
}

pub struct Mover {
    options: MoveOptions,
    probe: Arc<dyn InUseProbe>,
}

impl Mover {
    pub fn new(options: MoveOptions) -> Self {
        Self {
            options,
            probe: default_probe(),
        }
    }

    /// Replace the in-use probe.
    pub fn with_probe(mut self, probe: Arc<dyn InUseProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn options(&self) -> &MoveOptions {
        &self.options
    }

    /// Move every group of `batch`, recording mutations in `ledger`.
    ///
    /// Fails as a whole only when a destination location is already busy or the
    /// worker pool cannot be built; per-entity failures end up in the report.
    pub fn run(&self, batch: Batch, ledger: &ProcessingLedger) -> Result<MoveReport> {
        if batch.is_empty() {
            return Ok(MoveReport { batch });
        }
        let _guards = claim_destinations(&batch)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .thread_name(|i| format!("tier-move-{i}"))
            .build()
            .context("build move worker pool")?;

        let results: Vec<Vec<(EntityId, MoveState)>> = pool.install(|| {
            batch
                .roots()
                .par_iter()
                .map(|&root| self.process_group(&batch, root, ledger))
                .collect()
        });

        let mut batch = batch;
        for (id, state) in results.into_iter().flatten() {
            if let Some(e) = batch.get_mut(id) {
                e.state = state;
            }
        }
        let report = MoveReport { batch };
        info!(
            groups = report.batch.len(),
            done = report.done(),
            failed = report.failed(),
            dry_run = self.options.dry_run,
            "move run complete"
        );
        Ok(report)
    }

    fn process_group(
        &self,
        batch: &Batch,
        root: EntityId,
        ledger: &ProcessingLedger,
    ) -> Vec<(EntityId, MoveState)> {
        let group = batch.group(root);
        if shutdown::is_requested() {
            let reason = TierMoveError::Interrupted.to_string();
            return group
                .into_iter()
                .map(|id| (id, MoveState::Failed(reason.clone())))
                .collect();
        }

        let mut out = Vec::with_capacity(group.len());
        let Some(canonical) = batch.get(root) else {
            return out;
        };
        let state = self.process_entity(batch, canonical, ledger);
        let canonical_done = state.is_done();
        out.push((root, state));
        if !canonical_done {
            // Dependents stay Pending.
            return out;
        }

        // Group order puts every entity after the one it links to.
        let mut done: HashSet<EntityId> = HashSet::from([root]);
        for &id in &group[1..] {
            let Some(dep) = batch.get(id) else { continue };
            let Some(parent) = dep.hardlink_of.or(dep.symlink_of) else { continue };
            if !done.contains(&parent) {
                trace!(path = %dep.source_path.display(), "link target not placed; left pending");
                continue;
            }
            let state = self.process_entity(batch, dep, ledger);
            if state.is_done() {
                done.insert(id);
            }
            out.push((id, state));
        }

        if self.options.remove_source && !self.options.dry_run {
            if out.len() == group.len() && out.iter().all(|(_, s)| s.is_done()) {
                remove_sources(batch, &group, ledger);
            } else {
                warn!(
                    path = %canonical.source_path.display(),
                    "group partially moved; keeping all sources"
                );
            }
        }
        out
    }

    fn process_entity(
        &self,
        batch: &Batch,
        entity: &MigrationEntity,
        ledger: &ProcessingLedger,
    ) -> MoveState {
        let mut state = MoveState::Pending;
        match self.advance(batch, entity, ledger, &mut state) {
            Ok(()) => state,
            Err(e) => {
                let code = e.downcast_ref::<TierMoveError>().map(TierMoveError::code);
                warn!(
                    path = %entity.source_path.display(),
                    from = ?state,
                    code,
                    error = %format!("{e:#}"),
                    "entity move failed"
                );
                MoveState::Failed(format!("{e:#}"))
            }
        }
    }

    fn advance(
        &self,
        batch: &Batch,
        entity: &MigrationEntity,
        ledger: &ProcessingLedger,
        state: &mut MoveState,
    ) -> Result<()> {
        let destination = entity
            .destination
            .as_ref()
            .ok_or_else(|| TierMoveError::DestinationUnset(entity.source_path.clone()))?;
        let dest = entity
            .destination_path
            .as_deref()
            .ok_or_else(|| TierMoveError::DestinationUnset(entity.source_path.clone()))?;

        ensure_not_in_use(self.probe.as_ref(), &entity.source_path)?;

        self.ensure_ancestors(entity, ledger)?;
        *state = MoveState::DirsEnsured;
        trace!(path = %entity.source_path.display(), "ancestors ensured");

        let placement = entity.placement();
        self.place_content(batch, entity, placement, destination, dest)?;
        *state = MoveState::ContentPlaced;

        self.apply_attributes(entity, placement, dest)?;
        *state = MoveState::PermissionsApplied;

        if !self.options.dry_run {
            if let Some(kind) = ledger_kind(placement) {
                ledger.record(kind, dest, Some(&entity.source_path));
            }
        }
        *state = MoveState::Done;
        debug!(src = %entity.source_path.display(), dest = %dest.display(), ?placement, "entity moved");
        Ok(())
    }

    /// Create missing ancestor directories head to tail with the source's owner and mode.
    fn ensure_ancestors(&self, entity: &MigrationEntity, ledger: &ProcessingLedger) -> Result<()> {
        for node in entity.ancestors.descend() {
            let dest = node
                .destination_path
                .as_deref()
                .ok_or_else(|| TierMoveError::DestinationUnset(node.source_path.clone()))?;
            match fs::symlink_metadata(dest) {
                Ok(m) if m.is_dir() => continue,
                Ok(_) => {
                    return Err(anyhow!(
                        "destination ancestor '{}' exists but is not a directory",
                        dest.display()
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error_with_help("stat", dest)(e)),
            }

            if self.options.dry_run {
                info!(path = %dest.display(), "dry-run: would create directory");
                continue;
            }
            match DirBuilder::new().mode(node.metadata.mode).create(dest) {
                Ok(()) => {}
                // Another worker created it between the stat and the mkdir.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dest.is_dir() => continue,
                Err(e) => return Err(io_error_with_help("create directory", dest)(e)),
            }
            attrs::apply_owner_and_mode(dest, &node.metadata)?;
            attrs::preserve_times(dest, &node.metadata);
            ledger.record(LedgerKind::DirectoryCreated, dest, Some(&node.source_path));
        }
        Ok(())
    }

    fn place_content(
        &self,
        batch: &Batch,
        entity: &MigrationEntity,
        placement: Placement,
        destination: &StorageLocation,
        dest: &Path,
    ) -> Result<()> {
        let dry = self.options.dry_run;
        match placement {
            Placement::Hardlink(target) => {
                let original = destination_of(batch, target)?;
                if dry {
                    info!(link = %dest.display(), target = %original.display(), "dry-run: would hard link");
                    return Ok(());
                }
                fs::hard_link(original, dest).map_err(io_error_with_help("hard link", dest))?;
            }
            Placement::InternalSymlink(target) => {
                let original = destination_of(batch, target)?;
                if dry {
                    info!(link = %dest.display(), target = %original.display(), "dry-run: would symlink");
                    return Ok(());
                }
                symlink(original, dest).map_err(io_error_with_help("symlink", dest))?;
            }
            Placement::ExternalSymlink => {
                let raw = entity.metadata.link_target.as_deref().ok_or_else(|| {
                    anyhow!("symlink {} has no recorded target", entity.source_path.display())
                })?;
                if dry {
                    info!(link = %dest.display(), target = ?raw, "dry-run: would recreate symlink");
                    return Ok(());
                }
                symlink(raw, dest).map_err(io_error_with_help("symlink", dest))?;
            }
            Placement::EmptyDirectory => {
                if dry {
                    info!(path = %dest.display(), "dry-run: would create empty directory");
                    return Ok(());
                }
                DirBuilder::new()
                    .mode(entity.metadata.mode)
                    .create(dest)
                    .map_err(io_error_with_help("create directory", dest))?;
            }
            Placement::RegularFile => {
                let current = fs::symlink_metadata(&entity.source_path)
                    .map_err(io_error_with_help("stat", &entity.source_path))?;
                if !current.is_file() {
                    return Err(TierMoveError::UnsupportedFileType(entity.source_path.clone()).into());
                }
                ensure_free_space(destination, entity.share.floor, entity.metadata.size)?;
                if dry {
                    info!(src = %entity.source_path.display(), dest = %dest.display(), bytes = entity.metadata.size, "dry-run: would copy");
                    return Ok(());
                }
                let report = copy_verified(&entity.source_path, dest)?;
                if report.bytes != current.len() {
                    debug!(
                        path = %entity.source_path.display(),
                        expected = current.len(),
                        copied = report.bytes,
                        "source size changed during copy"
                    );
                }
            }
            Placement::Unsupported => {
                return Err(TierMoveError::UnsupportedFileType(entity.source_path.clone()).into());
            }
        }
        Ok(())
    }

    fn apply_attributes(&self, entity: &MigrationEntity, placement: Placement, dest: &Path) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        match placement {
            Placement::InternalSymlink(_) | Placement::ExternalSymlink => {
                attrs::apply_symlink_owner(dest, &entity.metadata)?;
                attrs::preserve_times(dest, &entity.metadata);
            }
            // Same inode as the canonical entity, which already carries everything.
            Placement::Hardlink(_) => {}
            Placement::EmptyDirectory | Placement::RegularFile => {
                attrs::apply_owner_and_mode(dest, &entity.metadata)?;
                attrs::preserve_xattrs(&entity.source_path, dest);
                attrs::preserve_times(dest, &entity.metadata);
            }
            Placement::Unsupported => {}
        }
        Ok(())
    }
}

/// Run a batch with default options.
pub fn move_entities(batch: Batch, ledger: &ProcessingLedger) -> Result<MoveReport> {
    Mover::new(MoveOptions::default()).run(batch, ledger)
}

fn ledger_kind(placement: Placement) -> Option<LedgerKind> {
    match placement {
        Placement::RegularFile => Some(LedgerKind::FileMoved),
        Placement::Hardlink(_) => Some(LedgerKind::HardlinkCreated),
        Placement::InternalSymlink(_) | Placement::ExternalSymlink => Some(LedgerKind::SymlinkCreated),
        Placement::EmptyDirectory => Some(LedgerKind::DirectoryCreated),
        Placement::Unsupported => None,
    }
}

fn destination_of(batch: &Batch, id: EntityId) -> Result<&Path> {
    batch
        .get(id)
        .and_then(|e| e.destination_path.as_deref())
        .ok_or_else(|| anyhow!("canonical entity {} has no destination path", id.index()))
}

/// Claim every distinct destination location in the batch.
fn claim_destinations(batch: &Batch) -> Result<Vec<TransferGuard>, TierMoveError> {
    let mut guards: Vec<TransferGuard> = Vec::new();
    for &root in batch.roots() {
        let Some(dest) = batch.get(root).and_then(|e| e.destination.as_ref()) else {
            continue;
        };
        if guards.iter().any(|g| Arc::ptr_eq(g.location(), dest)) {
            continue;
        }
        guards.push(dest.begin_transfer()?);
    }
    Ok(guards)
}

/// Dependents first so the canonical file is the last name to go.
fn remove_sources(batch: &Batch, group: &[EntityId], ledger: &ProcessingLedger) {
    for &id in group.iter().rev() {
        let Some(e) = batch.get(id) else { continue };
        let res = if e.metadata.is_dir() {
            fs::remove_dir(&e.source_path)
        } else {
            fs::remove_file(&e.source_path)
        };
        match res {
            Ok(()) => {
                ledger.record(LedgerKind::SourceRemoved, &e.source_path, None);
            }
            Err(err) => {
                warn!(path = %e.source_path.display(), error = %err, "failed to remove source after move");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover;
    use crate::fs_ops::in_use::NeverInUse;
    use crate::resolve::establish_paths;
    use crate::topology::{Share, StorageLocation};
    use crate::validate::validate;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _td: TempDir,
        cache: Arc<StorageLocation>,
        disk: Arc<StorageLocation>,
        share: Arc<Share>,
    }

    fn fixture() -> Fixture {
        let td = tempdir().unwrap();
        let cache = Arc::new(StorageLocation::pool("cache", td.path().join("cache")));
        let disk = Arc::new(StorageLocation::disk("disk1", td.path().join("disk1")));
        fs::create_dir_all(cache.root().join("media")).unwrap();
        fs::create_dir_all(disk.root()).unwrap();
        Fixture {
            _td: td,
            cache,
            disk,
            share: Arc::new(Share::new("media")),
        }
    }

    fn prepared(f: &Fixture) -> Batch {
        let mut batch = discover(&f.cache, &f.share).unwrap();
        for root in batch.roots().to_vec() {
            batch.assign_destination(root, Arc::clone(&f.disk));
        }
        validate(establish_paths(batch))
    }

    fn mover(remove_source: bool) -> Mover {
        Mover::new(MoveOptions {
            dry_run: false,
            remove_source,
            workers: 2,
        })
        .with_probe(Arc::new(NeverInUse))
    }

    #[test]
    fn file_moves_with_ancestors_and_mode() {
        let f = fixture();
        let dir = f.cache.root().join("media/Movies/Action");
        fs::create_dir_all(&dir).unwrap();
        fs::set_permissions(f.cache.root().join("media/Movies"), fs::Permissions::from_mode(0o750)).unwrap();
        fs::write(dir.join("film.mkv"), b"frames").unwrap();
        fs::set_permissions(dir.join("film.mkv"), fs::Permissions::from_mode(0o640)).unwrap();

        let ledger = ProcessingLedger::new();
        let report = mover(false).run(prepared(&f), &ledger).unwrap();
        assert_eq!(report.done(), 1);
        assert_eq!(report.failed(), 0);

        let out = f.disk.root().join("media/Movies/Action/film.mkv");
        assert_eq!(fs::read(&out).unwrap(), b"frames");
        assert_eq!(fs::metadata(&out).unwrap().mode() & 0o777, 0o640);
        let movies = fs::metadata(f.disk.root().join("media/Movies")).unwrap();
        assert_eq!(movies.mode() & 0o777, 0o750);
        // media, Movies, Action
        assert_eq!(ledger.count(LedgerKind::DirectoryCreated), 3);
        assert_eq!(ledger.count(LedgerKind::FileMoved), 1);
        assert!(dir.join("film.mkv").exists());
    }

    #[test]
    fn hardlinks_share_one_inode_at_destination() {
        let f = fixture();
        let base = f.cache.root().join("media");
        for d in ["a", "b", "c"] {
            fs::create_dir_all(base.join(d)).unwrap();
        }
        fs::write(base.join("a/file.txt"), b"shared").unwrap();
        fs::hard_link(base.join("a/file.txt"), base.join("b/file.txt")).unwrap();
        fs::hard_link(base.join("a/file.txt"), base.join("c/file.txt")).unwrap();

        let ledger = ProcessingLedger::new();
        let report = mover(false).run(prepared(&f), &ledger).unwrap();
        assert_eq!(report.done(), 3);

        let root = f.disk.root().join("media");
        let ino = fs::metadata(root.join("a/file.txt")).unwrap().ino();
        assert_eq!(fs::metadata(root.join("b/file.txt")).unwrap().ino(), ino);
        assert_eq!(fs::metadata(root.join("c/file.txt")).unwrap().ino(), ino);
        assert_eq!(ledger.count(LedgerKind::FileMoved), 1);
        assert_eq!(ledger.count(LedgerKind::HardlinkCreated), 2);
    }

    #[test]
    fn symlinks_are_recreated() {
        let f = fixture();
        let base = f.cache.root().join("media");
        fs::write(base.join("real.txt"), b"r").unwrap();
        symlink("real.txt", base.join("alias")).unwrap();
        symlink("../../elsewhere/thing", base.join("outside")).unwrap();

        let ledger = ProcessingLedger::new();
        let report = mover(false).run(prepared(&f), &ledger).unwrap();
        assert_eq!(report.failed(), 0);

        let root = f.disk.root().join("media");
        assert_eq!(fs::read_link(root.join("alias")).unwrap(), root.join("real.txt"));
        assert_eq!(
            fs::read_link(root.join("outside")).unwrap(),
            Path::new("../../elsewhere/thing")
        );
        assert_eq!(ledger.count(LedgerKind::SymlinkCreated), 2);
    }

    #[test]
    fn empty_directory_is_recreated() {
        let f = fixture();
        fs::create_dir_all(f.cache.root().join("media/Incoming/empty")).unwrap();
        let report = mover(false).run(prepared(&f), &ProcessingLedger::new()).unwrap();
        assert_eq!(report.done(), 1);
        assert!(f.disk.root().join("media/Incoming/empty").is_dir());
    }

    #[test]
    fn existing_destination_fails_and_keeps_dependents_pending() {
        let f = fixture();
        let base = f.cache.root().join("media");
        fs::write(base.join("x"), b"new").unwrap();
        fs::hard_link(base.join("x"), base.join("y")).unwrap();
        fs::create_dir_all(f.disk.root().join("media")).unwrap();
        fs::write(f.disk.root().join("media/x"), b"old").unwrap();

        let batch = prepared(&f);
        let root = batch.roots()[0];
        let dep = batch.get(root).unwrap().hardlinks[0];
        let report = mover(true).run(batch, &ProcessingLedger::new()).unwrap();

        assert!(report.state(root).unwrap().is_failed());
        assert_eq!(report.state(dep), Some(&MoveState::Pending));
        assert_eq!(fs::read(f.disk.root().join("media/x")).unwrap(), b"old");
        // Failed canonical entity: sources untouched even with remove_source.
        assert!(base.join("x").exists());
        assert!(base.join("y").exists());
    }

    #[test]
    fn sources_removed_after_full_group_success() {
        let f = fixture();
        let base = f.cache.root().join("media/Show");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("ep.mkv"), b"ep").unwrap();
        symlink("ep.mkv", base.join("latest")).unwrap();

        let ledger = ProcessingLedger::new();
        let report = mover(true).run(prepared(&f), &ledger).unwrap();
        assert_eq!(report.done(), 2);
        assert!(!base.join("ep.mkv").exists());
        assert!(fs::symlink_metadata(base.join("latest")).is_err());
        assert_eq!(ledger.count(LedgerKind::SourceRemoved), 2);
    }

    #[test]
    fn dry_run_touches_nothing() {
        let f = fixture();
        fs::create_dir_all(f.cache.root().join("media/sub")).unwrap();
        fs::write(f.cache.root().join("media/sub/f"), b"f").unwrap();

        let m = Mover::new(MoveOptions {
            dry_run: true,
            remove_source: true,
            workers: 1,
        })
        .with_probe(Arc::new(NeverInUse));
        let ledger = ProcessingLedger::new();
        let report = m.run(prepared(&f), &ledger).unwrap();
        assert_eq!(report.done(), 1);
        assert!(ledger.is_empty());
        assert!(!f.disk.root().join("media").exists());
        assert!(f.cache.root().join("media/sub/f").exists());
    }

    #[test]
    fn busy_destination_rejects_run() {
        let f = fixture();
        fs::write(f.cache.root().join("media/f"), b"f").unwrap();
        let _held = f.disk.begin_transfer().unwrap();
        let err = mover(false).run(prepared(&f), &ProcessingLedger::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TierMoveError>(),
            Some(TierMoveError::LocationBusy(_))
        ));
    }

    #[test]
    fn busy_source_fails_entity() {
        struct Busy;
        impl InUseProbe for Busy {
            fn is_in_use(&self, _: &Path) -> Result<bool> {
                Ok(true)
            }
        }
        let f = fixture();
        fs::write(f.cache.root().join("media/f"), b"f").unwrap();
        let m = mover(true).with_probe(Arc::new(Busy));
        let report = m.run(prepared(&f), &ProcessingLedger::new()).unwrap();
        assert_eq!(report.failed(), 1);
        assert!(!f.disk.root().join("media/f").exists());
        assert!(f.cache.root().join("media/f").exists());
        assert!(!f.disk.is_transferring());
    }

    #[test]
    fn floor_larger_than_free_space_fails_copy() {
        let f = fixture();
        fs::write(f.cache.root().join("media/f"), b"f").unwrap();
        let mut share = Share::new("media");
        share.floor = i64::MAX;
        let share = Arc::new(share);

        let mut batch = discover(&f.cache, &share).unwrap();
        for root in batch.roots().to_vec() {
            batch.assign_destination(root, Arc::clone(&f.disk));
        }
        let batch = validate(establish_paths(batch));
        let root = batch.roots()[0];
        let report = mover(false).run(batch, &ProcessingLedger::new()).unwrap();
        match report.state(root) {
            Some(MoveState::Failed(msg)) => assert!(msg.contains("Insufficient space")),
            other => panic!("unexpected state {other:?}"),
        }
    }
}
