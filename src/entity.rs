//! Migration entities and their relationships.
//!
//! Entities live in an arena ([`Batch`]) and refer to each other by [`EntityId`];
//! a hardlink or internal symlink points at its canonical target by id and the
//! target keeps the reverse list. Only canonical entities are roots of the batch,
//! so dependents are always reached after their target, however deep the chain
//! (a hardlink of a symlink hangs off the symlink, not off the file).
//!
//! An entity's ancestor chain is a plain ordered vector: index 0 is the share
//! directory (head), the last element is the entity's immediate parent (tail).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Arc;

use crate::meta::{EntryKind, EntryMetadata};
use crate::topology::{Share, StorageLocation};

/// Stable index of an entity inside its [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One directory between the share directory and an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorDirectory {
    pub source_path: PathBuf,
    /// Path relative to the share directory (empty for the share directory itself).
    pub relative_path: PathBuf,
    pub metadata: EntryMetadata,
    pub destination_path: Option<PathBuf>,
}

impl AncestorDirectory {
    /// Depth below the share directory.
    pub fn depth(&self) -> usize {
        self.relative_path.components().count()
    }
}

/// Ordered ancestor directories, shallowest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestorChain {
    nodes: Vec<AncestorDirectory>,
}

impl AncestorChain {
    /// Build from nodes collected while walking upward (deepest first).
    pub fn from_deepest_first(mut nodes: Vec<AncestorDirectory>) -> Self {
        nodes.reverse();
        Self { nodes }
    }

    pub fn head(&self) -> Option<&AncestorDirectory> {
        self.nodes.first()
    }

    pub fn tail(&self) -> Option<&AncestorDirectory> {
        self.nodes.last()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Head to tail (share directory down to the immediate parent).
    pub fn descend(&self) -> slice::Iter<'_, AncestorDirectory> {
        self.nodes.iter()
    }

    /// Tail to head.
    pub fn ascend(&self) -> std::iter::Rev<slice::Iter<'_, AncestorDirectory>> {
        self.nodes.iter().rev()
    }

    pub fn descend_mut(&mut self) -> slice::IterMut<'_, AncestorDirectory> {
        self.nodes.iter_mut()
    }
}

/// Processing state of an entity in the move engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Pending,
    DirsEnsured,
    ContentPlaced,
    PermissionsApplied,
    Done,
    Failed(String),
}

impl MoveState {
    pub fn is_done(&self) -> bool {
        matches!(self, MoveState::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MoveState::Failed(_))
    }
}

/// How an entity is materialized at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Hard link to the canonical target's destination.
    Hardlink(EntityId),
    /// Symlink pointing at the canonical target's destination.
    InternalSymlink(EntityId),
    /// Symlink recreated with its original target string.
    ExternalSymlink,
    EmptyDirectory,
    RegularFile,
    Unsupported,
}

/// A regular file, empty directory or symlink discovered under a share.
#[derive(Debug, Clone)]
pub struct MigrationEntity {
    pub id: EntityId,
    pub share: Arc<Share>,
    pub source: Arc<StorageLocation>,
    pub source_path: PathBuf,
    pub destination: Option<Arc<StorageLocation>>,
    pub destination_path: Option<PathBuf>,
    pub metadata: EntryMetadata,
    pub ancestors: AncestorChain,
    pub hardlink_of: Option<EntityId>,
    pub hardlinks: Vec<EntityId>,
    pub symlink_of: Option<EntityId>,
    pub symlinks: Vec<EntityId>,
    pub state: MoveState,
}

impl MigrationEntity {
    pub fn new(
        share: Arc<Share>,
        source: Arc<StorageLocation>,
        source_path: impl Into<PathBuf>,
        metadata: EntryMetadata,
    ) -> Self {
        Self {
            id: EntityId(usize::MAX),
            share,
            source,
            source_path: source_path.into(),
            destination: None,
            destination_path: None,
            metadata,
            ancestors: AncestorChain::default(),
            hardlink_of: None,
            hardlinks: Vec::new(),
            symlink_of: None,
            symlinks: Vec::new(),
            state: MoveState::Pending,
        }
    }

    pub fn is_hardlink(&self) -> bool {
        self.hardlink_of.is_some()
    }

    pub fn is_internal_symlink(&self) -> bool {
        self.symlink_of.is_some()
    }

    /// Directory containing the entity.
    pub fn dir(&self) -> &Path {
        self.source_path.parent().unwrap_or(Path::new(""))
    }

    pub fn placement(&self) -> Placement {
        if let Some(target) = self.hardlink_of {
            return Placement::Hardlink(target);
        }
        if let Some(target) = self.symlink_of {
            return Placement::InternalSymlink(target);
        }
        match self.metadata.kind {
            EntryKind::Symlink => Placement::ExternalSymlink,
            EntryKind::Directory => Placement::EmptyDirectory,
            EntryKind::File => Placement::RegularFile,
            EntryKind::Special => Placement::Unsupported,
        }
    }
}

/// Arena of entities discovered for one share on one source location.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entities: Vec<MigrationEntity>,
    roots: Vec<EntityId>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity to the arena (not yet a root). Returns its id.
    pub fn insert(&mut self, mut entity: MigrationEntity) -> EntityId {
        let id = EntityId(self.entities.len());
        entity.id = id;
        self.entities.push(entity);
        id
    }

    pub fn add_root(&mut self, id: EntityId) {
        self.roots.push(id);
    }

    /// Mark `dependent` as a hardlink of `canonical`.
    pub fn link_hardlink(&mut self, canonical: EntityId, dependent: EntityId) {
        self.entities[dependent.0].hardlink_of = Some(canonical);
        self.entities[canonical.0].hardlinks.push(dependent);
    }

    /// Mark `dependent` as an internal symlink of `target`.
    pub fn link_symlink(&mut self, target: EntityId, dependent: EntityId) {
        self.entities[dependent.0].symlink_of = Some(target);
        self.entities[target.0].symlinks.push(dependent);
    }

    pub fn get(&self, id: EntityId) -> Option<&MigrationEntity> {
        self.entities.get(id.0)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut MigrationEntity> {
        self.entities.get_mut(id.0)
    }

    pub fn entities(&self) -> &[MigrationEntity] {
        &self.entities
    }

    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    /// Number of top-level groups.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Every entity reachable from `root` through hardlink and symlink edges,
    /// depth first: each entity precedes its own hardlinks, which precede its
    /// symlinks. A dependent therefore always comes after the entity it points at.
    pub fn group(&self, root: EntityId) -> Vec<EntityId> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            ids.push(id);
            if let Some(e) = self.get(id) {
                // Reversed so the first hardlink is popped next.
                stack.extend(e.symlinks.iter().rev().copied());
                stack.extend(e.hardlinks.iter().rev().copied());
            }
        }
        ids
    }

    /// Keep only the roots for which `keep` returns true.
    pub fn retain_roots(&mut self, mut keep: impl FnMut(&Self, EntityId) -> bool) {
        let roots = std::mem::take(&mut self.roots);
        self.roots = roots.into_iter().filter(|id| keep(self, *id)).collect();
    }

    /// Assign one destination location to a root and all of its dependents.
    pub fn assign_destination(&mut self, root: EntityId, location: Arc<StorageLocation>) {
        for id in self.group(root) {
            if let Some(e) = self.get_mut(id) {
                e.destination = Some(Arc::clone(&location));
            }
        }
    }
}
