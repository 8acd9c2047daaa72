//! KAOS tasking core
//!
//! Preemptive round-robin scheduling, sleep, a cooperating mutex and
//! deferred-work queues for the KAOS kernel. The interrupt layer, heap and
//! paging live in the kernel binary; this crate exposes the scheduler entry
//! points they call into.
//!
//! Builds for the bare-metal kernel target and for the host, where the
//! integration tests drive the scheduler with synthetic interrupt frames.

#![no_std]

extern crate alloc;

pub mod arch;
pub mod list;
pub mod logging;
pub mod scheduler;
pub mod sync;
pub mod timer;
pub mod worker;
