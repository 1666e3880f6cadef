//! Pre-move consistency checks on the entity graph.
//!
//! A group is only handed to the move engine when its canonical entity, every
//! dependent reachable from it, and every ancestor chain along the way are
//! complete and mutually consistent. Groups that fail are dropped with a warning;
//! they are never partially moved.

use std::collections::HashSet;
use tracing::warn;

use crate::entity::{AncestorChain, AncestorDirectory, Batch, EntityId};
use crate::errors::{TierMoveError, ValidationFailure};

/// Keep only the groups whose canonical entity validates.
pub fn validate(mut batch: Batch) -> Batch {
    batch.retain_roots(|b, id| match check_group(b, id) {
        Ok(()) => true,
        Err(err) => {
            warn!(code = err.code(), error = %err, "group will not be moved");
            false
        }
    });
    batch
}

/// [`validate_entity`] with the failure tied to the group's source path.
pub fn check_group(batch: &Batch, id: EntityId) -> Result<(), TierMoveError> {
    validate_entity(batch, id).map_err(|reason| TierMoveError::Invalid {
        path: batch
            .get(id)
            .map(|e| e.source_path.clone())
            .unwrap_or_default(),
        reason,
    })
}

/// Validate one entity and, recursively, its hardlink and symlink dependents.
pub fn validate_entity(batch: &Batch, id: EntityId) -> Result<(), ValidationFailure> {
    let mut on_path = HashSet::new();
    check_entity(batch, id, &mut on_path)
}

fn check_entity(
    batch: &Batch,
    id: EntityId,
    on_path: &mut HashSet<EntityId>,
) -> Result<(), ValidationFailure> {
    if !on_path.insert(id) {
        return Err(ValidationFailure::Cycle);
    }
    let entity = batch.get(id).ok_or(ValidationFailure::UnknownEntity)?;

    if entity.ancestors.head().is_none() {
        return Err(ValidationFailure::MissingChainHead);
    }
    if entity.ancestors.tail().is_none() {
        return Err(ValidationFailure::MissingChainTail);
    }
    if entity.source_path.as_os_str().is_empty() {
        return Err(ValidationFailure::MissingSource);
    }
    if entity.destination.is_none() || entity.destination_path.is_none() {
        return Err(ValidationFailure::MissingDestination);
    }
    if entity
        .ancestors
        .descend()
        .any(|a| a.source_path == entity.source_path)
    {
        return Err(ValidationFailure::Cycle);
    }

    for &dep in &entity.hardlinks {
        check_entity(batch, dep, on_path)?;
        let d = batch.get(dep).ok_or(ValidationFailure::UnknownEntity)?;
        match d.hardlink_of {
            None => return Err(ValidationFailure::HardlinkTargetUnset),
            Some(t) if t != id => return Err(ValidationFailure::HardlinkTargetMismatch),
            Some(_) => {}
        }
    }
    for &dep in &entity.symlinks {
        check_entity(batch, dep, on_path)?;
        let d = batch.get(dep).ok_or(ValidationFailure::UnknownEntity)?;
        match d.symlink_of {
            None => return Err(ValidationFailure::SymlinkTargetUnset),
            Some(t) if t != id => return Err(ValidationFailure::SymlinkTargetMismatch),
            Some(_) => {}
        }
    }

    check_chain(&entity.ancestors)?;
    on_path.remove(&id);
    Ok(())
}

/// Walk the chain both ways; every node must be a real directory with both paths
/// set, depth must grow head to tail, and both walks must visit the same count.
fn check_chain(chain: &AncestorChain) -> Result<(), ValidationFailure> {
    let mut forward = 0usize;
    let mut last: Option<usize> = None;
    for node in chain.descend() {
        check_ancestor(node)?;
        let depth = node.depth();
        if last.is_some_and(|d| depth <= d) {
            return Err(ValidationFailure::ChainOrder);
        }
        last = Some(depth);
        forward += 1;
    }

    let mut backward = 0usize;
    let mut last: Option<usize> = None;
    for node in chain.ascend() {
        check_ancestor(node)?;
        let depth = node.depth();
        if last.is_some_and(|d| depth >= d) {
            return Err(ValidationFailure::ChainOrder);
        }
        last = Some(depth);
        backward += 1;
    }

    if forward != backward {
        return Err(ValidationFailure::ChainAsymmetry);
    }
    Ok(())
}

fn check_ancestor(node: &AncestorDirectory) -> Result<(), ValidationFailure> {
    if node.metadata.is_symlink() {
        return Err(ValidationFailure::AncestorIsSymlink);
    }
    if !node.metadata.is_dir() {
        return Err(ValidationFailure::AncestorNotDirectory);
    }
    if node.source_path.as_os_str().is_empty() {
        return Err(ValidationFailure::AncestorMissingSource);
    }
    if node.destination_path.is_none() {
        return Err(ValidationFailure::AncestorMissingDestination);
    }
    Ok(())
}
