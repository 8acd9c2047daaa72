//! Global task-switching switch.
//!
//! The kernel runs on a single core, so "nobody else may touch this" reduces
//! to "the scheduler must not switch tasks right now". This flag is that
//! critical section: while it is cleared every scheduler tick returns the
//! interrupted context unchanged, and mutex contention spins without
//! yielding.
//!
//! Disabling is done through [`PreemptGuard`], which restores the previous
//! state on drop so sections nest.

use core::sync::atomic::{AtomicBool, Ordering};

static SWITCHING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Returns whether the scheduler may currently switch tasks.
#[inline]
pub fn is_enabled() -> bool {
    SWITCHING_ENABLED.load(Ordering::Acquire)
}

/// Allows task switching.
pub fn enable() {
    SWITCHING_ENABLED.store(true, Ordering::Release);
}

/// Forbids task switching and returns whether it was allowed before.
pub fn disable() -> bool {
    SWITCHING_ENABLED.swap(false, Ordering::AcqRel)
}

/// Disables task switching until dropped.
pub fn guard() -> PreemptGuard {
    PreemptGuard {
        was_enabled: disable(),
    }
}

/// RAII critical section created by [`guard`].
pub struct PreemptGuard {
    was_enabled: bool,
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            enable();
        }
    }
}
