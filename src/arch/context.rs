//! Saved execution context of a task and construction of its initial frame.
//!
//! A suspended task is described by one pointer: the address of a
//! [`SavedRegisters`] block on its kernel stack, immediately followed by the
//! [`InterruptStackFrame`] the CPU pushed on interrupt entry. The resume
//! trampoline pops both and executes `iretq`.

use core::mem::size_of;
use core::ptr;

use bitflags::bitflags;

use super::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};

bitflags! {
    /// RFLAGS bits the scheduler cares about when building a fresh context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RFlags: u64 {
        /// Bit 1 is reserved and must always read as one.
        const RESERVED_1 = 1 << 1;
        /// Maskable interrupts are delivered while set.
        const INTERRUPT_ENABLE = 1 << 9;
    }
}

/// RFLAGS of a new task: IF=1 so timer preemption stays active, IOPL=0.
pub const INITIAL_RFLAGS: RFlags = RFlags::RESERVED_1.union(RFlags::INTERRUPT_ENABLE);

/// Saved general-purpose register state as pushed by the IRQ trampolines.
///
/// Layout contract:
/// - Must match the push/pop order in all generated IRQ stubs.
/// - Any change requires synchronized updates in assembly and tests.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SavedRegisters {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
}

/// Hardware interrupt return frame for `iretq` in 64-bit long mode.
///
/// In IA-32e mode `iretq` unconditionally pops all five values, with or
/// without a privilege-level change.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InterruptStackFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Bytes occupied by a complete saved context on a task stack.
pub const CONTEXT_SIZE: usize = size_of::<SavedRegisters>() + size_of::<InterruptStackFrame>();

/// Aligns `value` down to the given power-of-two `align`.
#[inline]
const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Describes what the first resume of a new task should do.
#[derive(Clone, Copy, Debug)]
pub struct InitialContext {
    /// First instruction executed by the task.
    pub entry: u64,
    /// Value placed in the first-argument register (`rdi`).
    pub arg: u64,
    /// Address the entry function returns into when it finishes.
    pub return_trap: u64,
}

/// Builds the initial saved context at the top of a task stack.
///
/// Resuming the returned pointer enters `ctx.entry` in ring 0 with kernel
/// code/data selectors, interrupts enabled and `ctx.arg` in `rdi`. The
/// entry function sees `ctx.return_trap` as its return address, so a task
/// that simply returns ends up in the scheduler's exit path.
///
/// `ctx.return_trap` is reached by `ret`, not `call`, so it starts with RSP
/// 16-byte aligned. It must realign the stack before calling ABI code.
///
/// # Safety
///
/// `stack_base..stack_base + stack_size` must be writable memory owned
/// exclusively by the caller and large enough for [`CONTEXT_SIZE`] plus one
/// return-address slot and alignment slack.
pub unsafe fn build_initial_frame(
    stack_base: *mut u8,
    stack_size: usize,
    ctx: InitialContext,
) -> *mut SavedRegisters {
    debug_assert!(stack_size >= CONTEXT_SIZE + 32, "task stack too small for a context");

    let stack_top = stack_base as usize + stack_size;

    // SysV entry alignment: RSP+8 is 16-byte aligned at function entry, the
    // slot at RSP holds the synthetic return address.
    let entry_rsp = align_down(stack_top, 16) - 8;
    let iret_addr = entry_rsp - size_of::<InterruptStackFrame>();
    let frame_addr = iret_addr - size_of::<SavedRegisters>();

    let frame_ptr = frame_addr as *mut SavedRegisters;
    let iret_ptr = iret_addr as *mut InterruptStackFrame;

    // SAFETY:
    // - All three addresses lie inside the caller-provided stack region.
    // - Every address is 8-byte aligned.
    unsafe {
        ptr::write(entry_rsp as *mut u64, ctx.return_trap);
        ptr::write(
            frame_ptr,
            SavedRegisters {
                rdi: ctx.arg,
                ..SavedRegisters::default()
            },
        );
        ptr::write(
            iret_ptr,
            InterruptStackFrame {
                rip: ctx.entry,
                cs: KERNEL_CODE_SELECTOR as u64,
                rflags: INITIAL_RFLAGS.bits(),
                rsp: entry_rsp as u64,
                ss: KERNEL_DATA_SELECTOR as u64,
            },
        );
    }

    frame_ptr
}

/// Returns the interrupt return frame stored directly behind `frame`.
///
/// # Safety
///
/// `frame` must point at a complete saved context ([`CONTEXT_SIZE`] bytes).
pub unsafe fn iret_frame_of(frame: *const SavedRegisters) -> InterruptStackFrame {
    let iret_ptr = (frame as usize + size_of::<SavedRegisters>()) as *const InterruptStackFrame;
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::read(iret_ptr) }
}
