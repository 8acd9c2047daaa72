//! Initial task context construction tests.

mod common;

use common::{setup, KERNEL_SPACE};
use kaos_tasking::arch::context::{self, InitialContext, SavedRegisters, CONTEXT_SIZE, INITIAL_RFLAGS};
use kaos_tasking::arch::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use kaos_tasking::scheduler::{self as sched, AddressSpace, TaskId, TASK_NAME_MAX, TASK_STACK_SIZE};

extern "C" fn entry_without_arg() {}

extern "C" fn entry_with_arg(_arg: usize) {}

/// Contract: a new task resumes into its entry in ring 0 with interrupts on.
#[test]
fn test_initial_iret_frame_targets_entry_in_kernel_mode() {
    let _guard = setup();

    let id = sched::spawn(entry_without_arg, "frame");
    let iret = sched::task_iret_frame(id).expect("spawned task must have an iret frame");

    assert!(iret.rip == entry_without_arg as usize as u64, "rip must be the entry point");
    assert!(iret.cs == 0x08, "cs must be the kernel code selector");
    assert!(iret.ss == 0x10, "ss must be the kernel data selector");
    assert!(iret.rflags == 0x202, "rflags must have IF and the reserved bit set");
    assert!(INITIAL_RFLAGS.bits() == 0x202);
    assert!(u64::from(KERNEL_CODE_SELECTOR) == iret.cs && u64::from(KERNEL_DATA_SELECTOR) == iret.ss);
}

#[test]
fn test_initial_stack_pointer_follows_call_alignment() {
    let _guard = setup();

    let id = sched::spawn(entry_without_arg, "align");
    let iret = sched::task_iret_frame(id).expect("spawned task must have an iret frame");
    let (base, top) = sched::task_stack_bounds(id).expect("spawned task owns a stack");

    assert!(top - base == TASK_STACK_SIZE as u64);
    assert!((iret.rsp + 8) % 16 == 0, "rsp + 8 must be 16-byte aligned at entry");
    assert!(iret.rsp >= base && iret.rsp < top, "rsp must lie inside the task stack");
    assert!(top - iret.rsp <= 32, "the entry frame must sit at the top of the stack");

    // SAFETY: rsp points at the synthetic return address inside the live stack.
    let return_address = unsafe { *(iret.rsp as *const u64) };
    assert!(
        return_address == sched::task_exit_address(),
        "a returning entry must land in the exit path"
    );
}

#[test]
fn test_initial_registers_carry_argument_only() {
    let _guard = setup();

    let id = sched::spawn_with_arg(entry_with_arg, 0xDEAD_BEEF, "arg");
    let frame = sched::task_frame_ptr(id).expect("task must exist");
    let (base, top) = sched::task_stack_bounds(id).expect("spawned task owns a stack");

    assert!(
        frame as u64 >= base && frame as u64 + CONTEXT_SIZE as u64 <= top,
        "the saved context must lie inside the task stack"
    );

    // SAFETY: frame points at the initial context inside the live stack.
    let regs = unsafe { *frame };
    assert!(regs.rdi == 0xDEAD_BEEF, "the argument must be in rdi");
    let expected = SavedRegisters {
        rdi: 0xDEAD_BEEF,
        ..SavedRegisters::default()
    };
    assert!(
        format!("{:?}", regs) == format!("{:?}", expected),
        "all other registers must start zeroed"
    );

    let no_arg = sched::spawn(entry_without_arg, "noarg");
    let frame = sched::task_frame_ptr(no_arg).expect("task must exist");
    // SAFETY: as above.
    assert!(unsafe { (*frame).rdi } == 0);
}

#[test]
fn test_build_initial_frame_on_caller_buffer() {
    let mut buffer = vec![0u64; 512];
    let base = buffer.as_mut_ptr() as *mut u8;
    let size = buffer.len() * 8;

    // SAFETY: the buffer is owned here and large enough for one context.
    let frame = unsafe {
        context::build_initial_frame(
            base,
            size,
            InitialContext {
                entry: 0x1000,
                arg: 7,
                return_trap: 0x2000,
            },
        )
    };
    // SAFETY: `frame` was just built inside the buffer.
    let iret = unsafe { context::iret_frame_of(frame) };

    assert!(iret.rip == 0x1000);
    assert!(unsafe { (*frame).rdi } == 7);
    assert!(unsafe { *(iret.rsp as *const u64) } == 0x2000);
    assert!((iret.rsp + 8) % 16 == 0);
}

#[test]
fn test_bootstrap_has_no_frame_until_first_tick() {
    let _guard = setup();

    assert!(
        sched::task_frame_ptr(TaskId::BOOTSTRAP) == Some(std::ptr::null_mut()),
        "bootstrap frame is unknown before it is interrupted"
    );
    assert!(sched::task_iret_frame(TaskId::BOOTSTRAP).is_none());
    assert!(sched::task_stack_bounds(TaskId::BOOTSTRAP).is_none());
}

#[test]
fn test_long_names_are_truncated() {
    let _guard = setup();

    let long = "a-very-long-task-name-that-does-not-fit-anywhere";
    let id = sched::spawn(entry_without_arg, long);
    let name = sched::task_name(id).expect("task must exist");

    assert!(name.len() == TASK_NAME_MAX, "name must be cut to the maximum length");
    assert!(long.starts_with(&name));

    let multibyte = "ääääääääääääääääääää";
    let id = sched::spawn(entry_without_arg, multibyte);
    let name = sched::task_name(id).expect("task must exist");
    assert!(name.len() <= TASK_NAME_MAX && name.chars().all(|c| c == 'ä'));
}

#[test]
fn test_spawned_tasks_inherit_creator_address_space() {
    let _guard = setup();
    sched::init(AddressSpace::new(0xABC000), common::BOOT_STACK_TOP);

    let a = sched::spawn(entry_without_arg, "a");
    assert!(sched::task_address_space(a) == Some(AddressSpace::new(0xABC000)));

    common::run_until_current(a, 2);
    let child = sched::spawn(entry_without_arg, "child");
    assert!(
        sched::task_address_space(child) == Some(AddressSpace::new(0xABC000)),
        "a task created by a task inherits its address space"
    );

    sched::init(KERNEL_SPACE, common::BOOT_STACK_TOP);
    assert!(sched::task_address_space(TaskId::BOOTSTRAP) == Some(KERNEL_SPACE));
}
