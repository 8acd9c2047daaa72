//! Preemptive round-robin scheduler over a single ready queue.
//!
//! Every task, the bootstrap task included, lives in one [`List`] in
//! creation order. The timer interrupt (and the yield software interrupt)
//! enters [`on_timer_tick`] with the interrupted task's saved frame; the
//! scheduler records it, picks the next runnable task and hands back the
//! frame the interrupt trampoline should resume.
//!
//! A task that kills itself is unlinked immediately, but its stack stays
//! parked in `pending_free_stacks` until a later tick runs on another
//! task's stack. Freeing it earlier would pull the memory out from under
//! the code that is still executing the kill path.

use core::mem;

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::context::{self, InitialContext, InterruptStackFrame, SavedRegisters};
use crate::arch::interrupts;
use crate::list::{List, NodeId};
use crate::sync::preempt;
use crate::sync::spinlock::SpinLock;
use crate::timer;

use super::task::{AddressSpace, Task, TaskId, TaskStack, TaskState};

/// Entry point of a task created with [`spawn`].
///
/// Returning from the entry function terminates the task.
pub type TaskFn = extern "C" fn();

/// Entry point of a task created with [`spawn_with_arg`].
pub type TaskFnWithArg = extern "C" fn(usize);

/// Which context the scheduler believes is on the CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Current {
    Task(NodeId),

    /// The running task killed itself and is already unlinked. The CPU is
    /// still on its stack until the next switch. `next` is the node that
    /// followed it, where round-robin selection resumes (`None`: the head).
    Exited { next: Option<NodeId> },
}

struct SchedulerState {
    tasks: List<Task>,
    current: Current,
    bootstrap: NodeId,
    next_id: u32,

    /// Stacks of tasks that killed themselves, freed on a later tick.
    pending_free_stacks: Vec<TaskStack>,
}

impl SchedulerState {
    fn new(kernel_space: AddressSpace, boot_stack_top: u64) -> Self {
        let mut tasks = List::new();
        let bootstrap = tasks.append(Task::bootstrap(boot_stack_top, kernel_space));
        Self {
            tasks,
            current: Current::Task(bootstrap),
            bootstrap,
            next_id: TaskId::FIRST_SPAWNED,
            pending_free_stacks: Vec::new(),
        }
    }

    fn task(&self, node: NodeId) -> &Task {
        match self.tasks.get(node) {
            Some(task) => task,
            None => panic!("sched: ready queue lost node {:?}", node),
        }
    }

    fn task_mut(&mut self, node: NodeId) -> &mut Task {
        match self.tasks.get_mut(node) {
            Some(task) => task,
            None => panic!("sched: ready queue lost node {:?}", node),
        }
    }

    fn find(&self, id: TaskId) -> Option<NodeId> {
        self.tasks
            .iter()
            .find(|(_, task)| task.id == id)
            .map(|(node, _)| node)
    }

    /// Node of the executing task. Panics between a self-kill and the next switch.
    fn current_node(&self, op: &str) -> NodeId {
        match self.current {
            Current::Task(node) => node,
            Current::Exited { .. } => panic!("{}: current task has already exited", op),
        }
    }

    fn head(&self) -> NodeId {
        match self.tasks.head() {
            Some(node) => node,
            None => panic!("sched: ready queue is empty"),
        }
    }

    /// Wakes the first sleeping task whose wakeup tick has passed.
    fn wake_one(&mut self, now: u64) -> Option<NodeId> {
        let node = self
            .tasks
            .iter()
            .find(|(_, task)| task.is_sleeping() && task.wakeup_tick <= now)
            .map(|(node, _)| node)?;

        let task = self.task_mut(node);
        task.state = TaskState::Running;
        task.wakeup_tick = 0;
        log::debug!(
            target: "sched",
            "waking task from sleep: id {} ({})",
            task.id,
            task.name
        );
        Some(node)
    }

    /// Round-robin successor of the current task, skipping sleepers.
    fn next_runnable(&self) -> NodeId {
        let start = match self.current {
            Current::Task(node) => self.tasks.next(node).unwrap_or_else(|| self.head()),
            Current::Exited { next } => next.unwrap_or_else(|| self.head()),
        };

        if !self.task(start).is_sleeping() {
            return start;
        }

        match self
            .tasks
            .find_next_matching(start, |task| !task.is_sleeping())
        {
            Some(node) => node,
            None => panic!("sched: no runnable task, every task is sleeping"),
        }
    }

    /// Makes `selected` current and returns the frame to resume.
    fn switch_to(
        &mut self,
        selected: NodeId,
        current_frame: *mut SavedRegisters,
    ) -> *mut SavedRegisters {
        if self.current == Current::Task(selected) {
            return current_frame;
        }

        self.current = Current::Task(selected);
        let task = self.task(selected);
        assert!(
            !task.frame_ptr.is_null(),
            "sched: task {} ({}) has no saved context",
            task.id,
            task.name
        );

        (arch_callbacks().prepare_resume)(task.kernel_stack_top, task.frame_ptr);
        task.frame_ptr
    }
}

// SAFETY:
// - `SchedulerState` is only reachable through the `SCHED` spinlock.
// - Raw frame pointers in tasks point into task-owned stacks (or the boot
//   stack) and are only read/written while holding the lock.
static SCHED: SpinLock<Option<SchedulerState>> = SpinLock::new(None);

/// Architecture-specific callbacks used by the scheduler core.
///
/// Keeps the software interrupt and TSS programming out of the selection
/// logic so host tests can replace them.
#[derive(Clone, Copy)]
pub struct SchedulerArchCallbacks {
    /// Enters the scheduler from task context. Returns once the caller is
    /// resumed.
    pub request_reschedule: fn(),
    /// Called right before `frame` is handed back to the interrupt
    /// trampoline. `kernel_stack_top` is the resumed task's stack top
    /// (TSS.RSP0).
    pub prepare_resume: fn(kernel_stack_top: u64, frame: *mut SavedRegisters),
}

fn default_prepare_resume(_kernel_stack_top: u64, _frame: *mut SavedRegisters) {}

impl SchedulerArchCallbacks {
    const fn default_callbacks() -> Self {
        Self {
            request_reschedule: interrupts::raise_yield,
            prepare_resume: default_prepare_resume,
        }
    }
}

static SCHED_ARCH_CALLBACKS: SpinLock<SchedulerArchCallbacks> =
    SpinLock::new(SchedulerArchCallbacks::default_callbacks());

/// Executes `f` while holding the scheduler spinlock.
///
/// Panics when [`init`] has not run yet.
fn with_sched<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    let mut sched = SCHED.lock();
    match sched.as_mut() {
        Some(meta) => f(meta),
        None => panic!("scheduler not initialized"),
    }
}

/// Looks up `id` and projects its control block, `None` if unknown or not initialized.
fn query<R>(id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
    let sched = SCHED.lock();
    let meta = sched.as_ref()?;
    let node = meta.find(id)?;
    Some(f(meta.task(node)))
}

fn arch_callbacks() -> SchedulerArchCallbacks {
    *SCHED_ARCH_CALLBACKS.lock()
}

/// Replaces the architecture callbacks.
pub fn set_arch_callbacks(callbacks: SchedulerArchCallbacks) {
    *SCHED_ARCH_CALLBACKS.lock() = callbacks;
}

/// Restores the callbacks that raise the yield vector and leave the TSS alone.
pub fn reset_arch_callbacks_to_default() {
    *SCHED_ARCH_CALLBACKS.lock() = SchedulerArchCallbacks::default_callbacks();
}

/// Initializes the scheduler and adopts the executing context as the
/// bootstrap task (id 1, "kernel_task").
///
/// `kernel_space` becomes the bootstrap task's address space and is
/// inherited by everything it creates. `boot_stack_top` is what
/// [`SchedulerArchCallbacks::prepare_resume`] receives when the bootstrap
/// task is resumed.
///
/// Calling `init` again discards every task and frees their stacks. Task
/// switching is enabled on return.
pub fn init(kernel_space: AddressSpace, boot_stack_top: u64) {
    let previous = {
        let mut sched = SCHED.lock();
        sched.replace(SchedulerState::new(kernel_space, boot_stack_top))
    };
    // Old stacks go back to the heap outside the scheduler lock.
    drop(previous);

    preempt::enable();
    log::info!(
        target: "sched",
        "scheduler initialized: bootstrap task {} (kernel_task), address space {:#x}",
        TaskId::BOOTSTRAP,
        kernel_space.root()
    );
}

/// Returns whether [`init`] has run.
pub fn is_initialized() -> bool {
    SCHED.lock().is_some()
}

extern "C" fn task_return_trap() -> ! {
    exit_current()
}

// A returning entry function `ret`s into this shim with RSP 16-byte aligned.
// It re-establishes the call-site alignment (RSP = 8 mod 16 at entry)
// before calling into Rust.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
core::arch::global_asm!(
    ".global kaos_task_return_shim",
    "kaos_task_return_shim:",
    "and rsp, -16",
    "call {trap}",
    "ud2",
    trap = sym task_return_trap,
);

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
extern "C" {
    fn kaos_task_return_shim() -> !;
}

/// Address primed as the return address of every new task.
///
/// A task whose entry function returns continues here and exits.
pub fn task_exit_address() -> u64 {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        kaos_task_return_shim as usize as u64
    }
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    {
        task_return_trap as *const () as usize as u64
    }
}

fn spawn_internal(entry: u64, arg: u64, name: &str) -> TaskId {
    // The stack is allocated and prepared before taking the scheduler lock.
    let stack = TaskStack::allocate();

    // SAFETY:
    // - `stack` is a fresh, exclusively owned allocation of `stack.size()` bytes.
    // - `TASK_STACK_SIZE` leaves room for the context and alignment slack.
    let frame_ptr = unsafe {
        context::build_initial_frame(
            stack.base(),
            stack.size(),
            InitialContext {
                entry,
                arg,
                return_trap: task_exit_address(),
            },
        )
    };
    debug_assert!(stack.contains_frame(frame_ptr));

    let id = with_sched(|meta| {
        let creator = meta.current_node("spawn");
        let address_space = meta.task(creator).address_space;

        let id = TaskId::new(meta.next_id);
        meta.next_id += 1;
        meta.tasks
            .append(Task::spawned(id, name, frame_ptr, stack, address_space));
        id
    });

    log::info!(
        target: "sched",
        "created task {} ({}) entry={:#x}",
        id,
        name,
        entry
    );
    id
}

/// Creates a task that starts at `entry` and appends it to the ready queue.
///
/// The task inherits the creator's address space. The name is truncated to
/// [`TASK_NAME_MAX`](super::TASK_NAME_MAX) bytes.
pub fn spawn(entry: TaskFn, name: &str) -> TaskId {
    spawn_internal(entry as usize as u64, 0, name)
}

/// Like [`spawn`], but `entry` receives `arg` as its first argument.
pub fn spawn_with_arg(entry: TaskFnWithArg, arg: usize, name: &str) -> TaskId {
    spawn_internal(entry as usize as u64, arg as u64, name)
}

/// Removes task `id` from the ready queue and releases its resources.
///
/// Killing the bootstrap task or an unknown id is fatal. When `id` is the
/// calling task this function does not return.
pub fn kill(id: TaskId) {
    assert!(
        id != TaskId::BOOTSTRAP,
        "kill: the bootstrap task cannot be killed"
    );

    let (removed, was_current) = with_sched(|meta| {
        let Some(node) = meta.find(id) else {
            panic!("kill: no task with id {}", id);
        };

        let successor = meta.tasks.next(node);
        let was_current = meta.current == Current::Task(node);
        let mut removed = meta.tasks.remove(node);

        if was_current {
            meta.current = Current::Exited { next: successor };
            if let Some(stack) = removed.stack.take() {
                meta.pending_free_stacks.push(stack);
            }
        } else if meta.current == (Current::Exited { next: Some(node) }) {
            meta.current = Current::Exited { next: successor };
        }

        (removed, was_current)
    });

    log::info!(
        target: "sched",
        "killed task {} ({})",
        removed.id,
        removed.name
    );
    drop(removed);

    if was_current {
        yield_now();
        panic!("kill: task {} resumed after killing itself", id);
    }
}

/// Kills the task with the given id if it exists.
///
/// Returns whether a task was found. Passing the bootstrap id is fatal.
pub fn kill_by_id(id: TaskId) -> bool {
    let found = with_sched(|meta| meta.find(id).is_some());
    if found {
        kill(id);
    }
    found
}

/// Terminates the calling task.
pub fn exit_current() -> ! {
    let id = current_id();
    kill(id);
    panic!("exit_current: task {} kept running after exit", id);
}

/// Id of the executing task.
pub fn current_id() -> TaskId {
    with_sched(|meta| {
        let node = meta.current_node("current_id");
        meta.task(node).id
    })
}

/// Suspends the calling task for at least `milliseconds`.
///
/// The duration is rounded up to whole timer ticks. Zero returns at once.
/// The bootstrap task must never sleep.
pub fn sleep(milliseconds: u32) {
    if milliseconds == 0 {
        return;
    }
    let ticks = timer::ms_to_ticks(milliseconds);

    with_sched(|meta| {
        let node = meta.current_node("sleep");
        assert!(
            node != meta.bootstrap,
            "sleep: the bootstrap task cannot sleep"
        );

        let now = timer::tick_count();
        let task = meta.task_mut(node);
        assert!(
            task.state != TaskState::Sleeping,
            "sleep: task {} is already sleeping",
            task.id
        );
        assert!(
            task.wakeup_tick == 0,
            "sleep: task {} has a stale wakeup tick {}",
            task.id,
            task.wakeup_tick
        );

        task.state = TaskState::Sleeping;
        task.wakeup_tick = now + ticks;
        log::trace!(
            target: "sched",
            "task {} sleeps until tick {}",
            task.id,
            task.wakeup_tick
        );
    });

    yield_now();
}

/// Gives up the CPU by entering the scheduler through the yield vector.
pub fn yield_now() {
    (arch_callbacks().request_reschedule)();
}

/// Scheduler entry for the timer and yield interrupts.
///
/// Records `current_frame` as the interrupted task's context and returns
/// the frame to resume. While task switching is disabled, or before
/// [`init`], the interrupted frame is returned unchanged.
pub fn on_timer_tick(current_frame: *mut SavedRegisters) -> *mut SavedRegisters {
    if !preempt::is_enabled() {
        return current_frame;
    }

    // Freed after the lock is released.
    let stacks_to_free: Vec<TaskStack>;

    let result = {
        let mut sched = SCHED.lock();
        let Some(meta) = sched.as_mut() else {
            return current_frame;
        };

        // Only safe once a live task runs again: while `Exited`, the CPU is
        // still on the newest parked stack.
        stacks_to_free = match meta.current {
            Current::Task(_) => mem::take(&mut meta.pending_free_stacks),
            Current::Exited { .. } => Vec::new(),
        };

        if meta.tasks.len() == 1 && meta.current == Current::Task(meta.bootstrap) {
            current_frame
        } else {
            if let Current::Task(node) = meta.current {
                meta.task_mut(node).frame_ptr = current_frame;
            }

            let selected = match meta.wake_one(timer::tick_count()) {
                Some(node) => node,
                None => meta.next_runnable(),
            };
            meta.switch_to(selected, current_frame)
        }
    };

    drop(stacks_to_free);
    result
}

/// Handler for [`IRQ0_PIT_TIMER_VECTOR`](interrupts::IRQ0_PIT_TIMER_VECTOR):
/// advances the tick counter, then runs the scheduler.
pub fn timer_irq_handler(_vector: u8, frame: &mut SavedRegisters) -> *mut SavedRegisters {
    timer::advance();
    on_timer_tick(frame as *mut SavedRegisters)
}

/// Handler for [`YIELD_VECTOR`](interrupts::YIELD_VECTOR): runs the
/// scheduler without advancing time.
pub fn yield_irq_handler(_vector: u8, frame: &mut SavedRegisters) -> *mut SavedRegisters {
    on_timer_tick(frame as *mut SavedRegisters)
}

/// Ids of all tasks in ready-queue order (bootstrap first).
pub fn task_ids() -> Vec<TaskId> {
    with_sched(|meta| meta.tasks.iter().map(|(_, task)| task.id).collect())
}

/// Number of tasks in the ready queue, bootstrap included.
pub fn task_count() -> usize {
    with_sched(|meta| meta.tasks.len())
}

pub fn task_state(id: TaskId) -> Option<TaskState> {
    query(id, |task| task.state)
}

/// Wakeup tick of `id`; zero unless the task is sleeping.
pub fn task_wakeup_tick(id: TaskId) -> Option<u64> {
    query(id, |task| task.wakeup_tick)
}

pub fn task_name(id: TaskId) -> Option<String> {
    query(id, |task| task.name.clone())
}

pub fn task_address_space(id: TaskId) -> Option<AddressSpace> {
    query(id, |task| task.address_space)
}

/// Returns the saved frame pointer for `id`.
///
/// Primarily intended for integration tests and diagnostics.
pub fn task_frame_ptr(id: TaskId) -> Option<*mut SavedRegisters> {
    query(id, |task| task.frame_ptr)
}

/// Returns a copy of the interrupt return frame saved behind `id`'s context.
///
/// `None` for unknown ids and for the bootstrap task, whose frames live on
/// the boot stack outside scheduler ownership.
pub fn task_iret_frame(id: TaskId) -> Option<InterruptStackFrame> {
    query(id, |task| {
        let stack = task.stack.as_ref()?;
        if !stack.contains_frame(task.frame_ptr) {
            return None;
        }
        // SAFETY:
        // - `frame_ptr` lies within the task's own stack with a full
        //   context behind it, as checked above.
        Some(unsafe { context::iret_frame_of(task.frame_ptr) })
    })
    .flatten()
}

/// Stack bounds `(base, top)` of `id`; `None` for the bootstrap task.
pub fn task_stack_bounds(id: TaskId) -> Option<(u64, u64)> {
    query(id, |task| {
        task.stack
            .as_ref()
            .map(|stack| (stack.base() as u64, stack.top()))
    })
    .flatten()
}

/// Kernel stack top passed to `prepare_resume` when `id` is resumed.
pub fn task_kernel_stack_top(id: TaskId) -> Option<u64> {
    query(id, |task| task.kernel_stack_top)
}
