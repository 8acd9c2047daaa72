//! Spinning mutex that cooperates with the scheduler.
//!
//! A contended `lock` does not block on a wait queue. It retries the
//! compare-and-swap and yields the CPU between attempts, so the holder gets
//! to run and release the lock under round-robin rotation. While task
//! switching is disabled there is nobody to yield to and it simply spins.
//!
//! The mutex does not own data; it only serializes the callers that agree
//! to take it, and it remembers which task holds it.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::scheduler::{self, TaskId};
use crate::sync::preempt;

const NO_OWNER: u32 = 0;

/// Exclusive lock with owner tracking.
///
/// Invariant: an owner is recorded exactly while the lock is held, and only
/// that owner may unlock it.
pub struct Mutex {
    locked: AtomicBool,
    owner: AtomicU32,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    /// Acquires the lock for the calling task.
    ///
    /// Each failed attempt yields to the scheduler when task switching is
    /// enabled. Re-locking a mutex the caller already holds never succeeds.
    pub fn lock(&self) {
        let mut contended = false;
        loop {
            if let Some(owner) = self.try_acquire() {
                if contended {
                    log::trace!(target: "mutex", "task {} acquired contended mutex", owner);
                }
                return;
            }

            contended = true;
            if preempt::is_enabled() {
                scheduler::yield_now();
            } else {
                core::hint::spin_loop();
            }
        }
    }

    /// Takes the flag and records the owner as one step with switching off.
    fn try_acquire(&self) -> Option<TaskId> {
        let _no_switch = preempt::guard();
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        let owner = scheduler::current_id();
        self.owner.store(owner.as_u32(), Ordering::Release);
        Some(owner)
    }

    /// Releases the lock. Only the owning task may unlock.
    pub fn unlock(&self) {
        let _no_switch = preempt::guard();
        assert!(self.is_locked(), "mutex: unlock of a mutex that is not locked");

        let caller = scheduler::current_id();
        let owner = self.owner.load(Ordering::Acquire);
        assert!(
            owner == caller.as_u32(),
            "mutex: task {} unlocked a mutex owned by task {}",
            caller,
            owner
        );

        self.owner.store(NO_OWNER, Ordering::Release);
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Task currently holding the lock.
    pub fn owner(&self) -> Option<TaskId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            raw => Some(TaskId::new(raw)),
        }
    }

    /// Disposes of the mutex. It must not be held.
    pub fn destroy(self) {
        assert!(!self.is_locked(), "mutex: destroying a locked mutex");
        assert!(
            self.owner().is_none(),
            "mutex: destroying a mutex that still records an owner"
        );
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
