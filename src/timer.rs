//! Monotonic tick counter driven by the PIT interrupt.
//!
//! The PIT itself is programmed by the interrupt layer; this module only
//! counts its interrupts and converts wall-clock durations into ticks.

use core::sync::atomic::{AtomicU64, Ordering};

/// Timer interrupt frequency.
pub const TIMER_HZ: u32 = 100;

/// Length of one tick in milliseconds.
pub const MS_PER_TICK: u32 = 1000 / TIMER_HZ;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Number of timer interrupts since boot.
#[inline]
pub fn tick_count() -> u64 {
    TICKS.load(Ordering::Acquire)
}

/// Advances the counter by one tick and returns the new value.
///
/// Called once per PIT interrupt, before the scheduler tick runs.
pub fn advance() -> u64 {
    TICKS.fetch_add(1, Ordering::AcqRel) + 1
}

/// Converts a duration to whole ticks, rounding up.
///
/// Any nonzero duration waits at least one tick.
pub fn ms_to_ticks(milliseconds: u32) -> u64 {
    if milliseconds == 0 {
        return 0;
    }
    (u64::from(milliseconds) * u64::from(TIMER_HZ))
        .div_ceil(1000)
        .max(1)
}
