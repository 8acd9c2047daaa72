//! Synchronization primitives.

pub mod mutex;
pub mod preempt;
pub mod spinlock;
