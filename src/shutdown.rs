//! Process-wide shutdown coordination.
//! The ctrlc handler sets the flag; the move engine checks it between groups and
//! marks whatever has not started as interrupted.
//!
//! Relaxed atomics are sufficient for a one-way "stop" flag.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::TierMoveError;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a cooperative shutdown (idempotent, signal-safe).
#[inline]
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

#[inline]
pub fn is_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// `Err(Interrupted)` once a shutdown has been requested.
#[inline]
pub fn check() -> Result<(), TierMoveError> {
    if is_requested() {
        Err(TierMoveError::Interrupted)
    } else {
        Ok(())
    }
}

/// Clear the flag. Only meaningful in tests that share one process.
#[doc(hidden)]
#[inline]
pub fn reset() {
    SHUTDOWN.store(false, Ordering::Relaxed);
}
