//! Shared harness for the host-side integration tests.
//!
//! Scheduler state is process-global, so every test takes [`setup`]'s guard
//! first. The "CPU" is modelled by one frame pointer: whatever the last
//! scheduler entry returned is what the interrupt trampoline would resume.
//! Yield requests are routed to a replaceable hook instead of `int 0x7E`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use kaos_tasking::arch::context::SavedRegisters;
use kaos_tasking::scheduler::{self as sched, AddressSpace, SchedulerArchCallbacks, TaskId};
use kaos_tasking::timer;

pub const KERNEL_SPACE: AddressSpace = AddressSpace::new(0x0010_0000);
pub const BOOT_STACK_TOP: u64 = 0x0009_0000;

type YieldHook = Box<dyn FnMut() + Send>;

static SERIAL: Mutex<()> = Mutex::new(());
static YIELD_HOOK: Mutex<Option<YieldHook>> = Mutex::new(None);
static RESUMES: Mutex<Vec<(u64, usize)>> = Mutex::new(Vec::new());
static CPU_FRAME: AtomicUsize = AtomicUsize::new(0);

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // should_panic tests poison locks on purpose.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn hooked_yield() {
    let hook = lock_ignoring_poison(&YIELD_HOOK).take();
    if let Some(mut hook) = hook {
        hook();
        let mut slot = lock_ignoring_poison(&YIELD_HOOK);
        if slot.is_none() {
            *slot = Some(hook);
        }
    }
}

fn record_resume(kernel_stack_top: u64, frame: *mut SavedRegisters) {
    lock_ignoring_poison(&RESUMES).push((kernel_stack_top, frame as usize));
}

/// Frame the bootstrap task is interrupted with on the boot stack.
pub fn bootstrap_frame() -> *mut SavedRegisters {
    static FRAME: OnceLock<usize> = OnceLock::new();
    *FRAME.get_or_init(|| Box::into_raw(Box::new(SavedRegisters::default())) as usize)
        as *mut SavedRegisters
}

/// Serializes the test, installs the test callbacks and re-initializes the
/// scheduler with the bootstrap task on the CPU.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = lock_ignoring_poison(&SERIAL);
    clear_yield_hook();
    take_resumes();
    sched::set_arch_callbacks(SchedulerArchCallbacks {
        request_reschedule: hooked_yield,
        prepare_resume: record_resume,
    });
    sched::init(KERNEL_SPACE, BOOT_STACK_TOP);
    CPU_FRAME.store(bootstrap_frame() as usize, Ordering::SeqCst);
    guard
}

/// Serializes the test without touching scheduler state.
pub fn serial() -> MutexGuard<'static, ()> {
    lock_ignoring_poison(&SERIAL)
}

/// Runs `hook` on every `yield_now` until cleared.
pub fn set_yield_hook(hook: impl FnMut() + Send + 'static) {
    *lock_ignoring_poison(&YIELD_HOOK) = Some(Box::new(hook));
}

pub fn clear_yield_hook() {
    *lock_ignoring_poison(&YIELD_HOOK) = None;
}

/// `(kernel_stack_top, frame)` pairs passed to `prepare_resume` so far.
pub fn take_resumes() -> Vec<(u64, usize)> {
    std::mem::take(&mut *lock_ignoring_poison(&RESUMES))
}

pub fn cpu_frame() -> *mut SavedRegisters {
    CPU_FRAME.load(Ordering::SeqCst) as *mut SavedRegisters
}

/// Scheduler entry through the yield vector: no time passes.
pub fn tick() -> *mut SavedRegisters {
    let next = sched::on_timer_tick(cpu_frame());
    CPU_FRAME.store(next as usize, Ordering::SeqCst);
    next
}

/// Scheduler entry through the PIT vector: advances time by one tick.
pub fn timer_tick() -> *mut SavedRegisters {
    // SAFETY: the CPU frame is either the leaked bootstrap frame or a
    // context inside a live (or parked) task stack.
    let frame = unsafe { &mut *cpu_frame() };
    let next = sched::timer_irq_handler(kaos_tasking::arch::interrupts::IRQ0_PIT_TIMER_VECTOR, frame);
    CPU_FRAME.store(next as usize, Ordering::SeqCst);
    next
}

/// Yield-ticks until `id` is current. Panics after `max` ticks.
pub fn run_until_current(id: TaskId, max: usize) {
    for _ in 0..max {
        if sched::current_id() == id {
            return;
        }
        tick();
    }
    assert!(
        sched::current_id() == id,
        "task {} did not become current within {} ticks",
        id,
        max
    );
}

/// Advances the timer by `ticks`, going through the PIT handler each time.
pub fn advance_time(ticks: u64) {
    for _ in 0..ticks {
        timer_tick();
    }
}

pub fn now() -> u64 {
    timer::tick_count()
}

pub extern "C" fn idle_task() {}

pub extern "C" fn idle_task_with_arg(_arg: usize) {}
