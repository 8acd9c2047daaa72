//! Interrupt-flag control and the software reschedule trigger.
//!
//! On bare metal (`x86_64`, `target_os = "none"`) these wrap `sti`/`cli`,
//! `pushfq` and `int`. On any hosted target the interrupt flag is emulated
//! by an atomic so the scheduler core keeps the same save/restore contract
//! while it is exercised by host-side tests.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use core::arch::asm;

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
use core::sync::atomic::{AtomicBool, Ordering};

const IRQ_BASE: u8 = 32;

/// PIT channel 0, remapped behind the CPU exceptions.
pub const IRQ0_PIT_TIMER_VECTOR: u8 = IRQ_BASE;

/// Software interrupt used by tasks to request an immediate reschedule.
///
/// The interrupt layer routes it into the same scheduler entry as the
/// timer, without advancing the tick counter.
pub const YIELD_VECTOR: u8 = 0x7E;

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
static EMULATED_IF: AtomicBool = AtomicBool::new(false);

/// Enable interrupts globally.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn enable() {
    // SAFETY: ring 0 only; `sti` has no memory effects.
    unsafe {
        asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Disable interrupts globally.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn disable() {
    // SAFETY: ring 0 only; `cli` has no memory effects.
    unsafe {
        asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
pub fn are_enabled() -> bool {
    let rflags: u64;
    // SAFETY:
    // - Reading RFLAGS via pushfq/pop is safe and does not modify flags.
    // - `rflags` is a plain register output.
    unsafe {
        asm!(
            "pushfq",
            "pop {}",
            out(reg) rflags,
            options(nomem, preserves_flags)
        );
    }
    (rflags & (1 << 9)) != 0
}

/// Raises the reschedule software interrupt.
///
/// Returns once the interrupt layer resumes the calling task.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn raise_yield() {
    // SAFETY:
    // - Software interrupt to the yield vector enters the same scheduler path
    //   as the timer IRQ.
    // - Valid only in ring 0, which holds for kernel code.
    unsafe {
        asm!("int {vector}", vector = const YIELD_VECTOR, options(nomem));
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn enable() {
    EMULATED_IF.store(true, Ordering::Release);
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn disable() {
    EMULATED_IF.store(false, Ordering::Release);
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
pub fn are_enabled() -> bool {
    EMULATED_IF.load(Ordering::Acquire)
}

/// Hosted targets have no interrupt layer to re-enter; the caller simply
/// continues.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn raise_yield() {}
