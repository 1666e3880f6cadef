//! Typed error definitions for tier_move.
//! Provides the well-known failure modes so logs and tests can match on them
//! after downcasting from `anyhow::Error`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum TierMoveError {
    #[error("Source is open by another process: {0}")]
    SourceInUse(PathBuf),

    #[error("Insufficient space on {location}: need more than {required} bytes free, have {available} bytes")]
    InsufficientSpace {
        location: String,
        required: i64,
        available: i64,
    },

    #[error("Digest mismatch copying {src}: source {source_digest}, destination {dest_digest}")]
    DigestMismatch {
        src: PathBuf,
        source_digest: String,
        dest_digest: String,
    },

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Entity directory has zero depth below its share: {0}")]
    ZeroSplitDepth(PathBuf),

    #[error("No destination location assigned for {0}")]
    DestinationUnset(PathBuf),

    #[error("Validation failed for {path}: {reason}")]
    Invalid {
        path: PathBuf,
        reason: ValidationFailure,
    },

    #[error("Storage location '{0}' already has an active transfer")]
    LocationBusy(String),

    #[error("Unknown storage location '{0}'")]
    UnknownLocation(String),

    #[error("Unknown share '{0}'")]
    UnknownShare(String),

    #[error("Invalid filesystem statistics for {path}: total {total}, free {free}")]
    InvalidFsStats { path: PathBuf, total: i64, free: i64 },

    #[error("Negative file size: {0}")]
    NegativeFileSize(i64),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl TierMoveError {
    /// Stable numeric code for structured logs.
    pub fn code(&self) -> u16 {
        match self {
            TierMoveError::SourceInUse(_) => 10,
            TierMoveError::InsufficientSpace { .. } => 11,
            TierMoveError::DigestMismatch { .. } => 12,
            TierMoveError::DestinationExists(_) => 13,
            TierMoveError::ZeroSplitDepth(_) => 20,
            TierMoveError::DestinationUnset(_) => 21,
            TierMoveError::Invalid { .. } => 22,
            TierMoveError::LocationBusy(_) => 30,
            TierMoveError::UnknownLocation(_) => 31,
            TierMoveError::UnknownShare(_) => 32,
            TierMoveError::InvalidFsStats { .. } => 40,
            TierMoveError::NegativeFileSize(_) => 41,
            TierMoveError::UnsupportedFileType(_) => 42,
            TierMoveError::Interrupted => 130,
        }
    }
}

/// Named reasons an entity graph is rejected before the move phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("ancestor chain head missing")]
    MissingChainHead,
    #[error("ancestor chain tail missing")]
    MissingChainTail,
    #[error("source location or path missing")]
    MissingSource,
    #[error("destination location or path missing")]
    MissingDestination,
    #[error("hardlink dependent has no canonical target")]
    HardlinkTargetUnset,
    #[error("hardlink dependent points at a different canonical target")]
    HardlinkTargetMismatch,
    #[error("symlink dependent has no canonical target")]
    SymlinkTargetUnset,
    #[error("symlink dependent points at a different canonical target")]
    SymlinkTargetMismatch,
    #[error("entity is not in the batch")]
    UnknownEntity,
    #[error("ancestor is a symlink")]
    AncestorIsSymlink,
    #[error("ancestor is not a directory")]
    AncestorNotDirectory,
    #[error("ancestor source path missing")]
    AncestorMissingSource,
    #[error("ancestor destination path missing")]
    AncestorMissingDestination,
    #[error("forward and backward ancestor traversals disagree")]
    ChainAsymmetry,
    #[error("ancestor depth does not strictly increase toward the entity")]
    ChainOrder,
    #[error("relationship cycle detected")]
    Cycle,
}
