//! Task control block and kernel stack ownership.

use core::alloc::Layout;
use core::fmt;
use core::ptr::{self, NonNull};

use alloc::alloc as heap_alloc;
use alloc::string::String;

use crate::arch::context::{SavedRegisters, CONTEXT_SIZE};

/// Size of every task's kernel stack.
pub const TASK_STACK_SIZE: usize = 16 * 1024;
const STACK_ALIGNMENT: usize = 16;
const PAGE_SIZE: usize = 4096;

/// Longest task name kept, in bytes.
pub const TASK_NAME_MAX: usize = 31;

/// Unique task identity. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u32);

impl TaskId {
    /// The permanent kernel task that was running when the scheduler started.
    pub const BOOTSTRAP: TaskId = TaskId(1);

    /// First id handed out to created tasks.
    pub(crate) const FIRST_SPAWNED: u32 = 2;

    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is eligible for scheduling (or is the one executing).
    Running,

    /// Task waits for its wakeup tick and is skipped by round-robin selection.
    Sleeping,
}

/// Opaque address-space handle supplied by the paging subsystem.
///
/// Carries the page-table root. New tasks inherit their creator's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(u64);

impl AddressSpace {
    pub const fn new(root: u64) -> Self {
        Self(root)
    }

    pub const fn root(self) -> u64 {
        self.0
    }
}

/// Heap-allocated kernel stack owned by exactly one task.
pub struct TaskStack {
    base: NonNull<u8>,
    size: usize,
}

impl TaskStack {
    fn layout() -> Layout {
        // Constants: non-zero size, power-of-two alignment.
        match Layout::from_size_align(TASK_STACK_SIZE, STACK_ALIGNMENT) {
            Ok(layout) => layout,
            Err(_) => unreachable!("task stack layout constants are invalid"),
        }
    }

    /// Allocates a stack and touches every page.
    ///
    /// Touching forces demand paging now rather than in IRQ context.
    /// Allocator exhaustion is fatal.
    pub fn allocate() -> Self {
        let layout = Self::layout();
        // SAFETY: layout has non-zero size.
        let raw = unsafe { heap_alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            heap_alloc::handle_alloc_error(layout);
        };

        // SAFETY: `base` points to a live allocation of `TASK_STACK_SIZE` bytes.
        unsafe {
            for page_off in (0..TASK_STACK_SIZE).step_by(PAGE_SIZE) {
                ptr::write_volatile(base.as_ptr().add(page_off), 0);
            }
        }

        Self {
            base,
            size: TASK_STACK_SIZE,
        }
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Highest address of the stack (exclusive), loaded into TSS.RSP0.
    pub fn top(&self) -> u64 {
        (self.base.as_ptr() as usize + self.size) as u64
    }

    /// Checks whether a complete saved context at `frame` lies within this stack.
    pub fn contains_frame(&self, frame: *const SavedRegisters) -> bool {
        if frame.is_null() {
            return false;
        }
        let frame_start = frame as usize;
        let frame_end = frame_start + CONTEXT_SIZE;
        let stack_start = self.base.as_ptr() as usize;
        let stack_end = stack_start + self.size;
        frame_start >= stack_start && frame_end <= stack_end
    }
}

impl Drop for TaskStack {
    fn drop(&mut self) {
        // SAFETY: `base` came from `allocate` with the same layout.
        unsafe {
            heap_alloc::dealloc(self.base.as_ptr(), Self::layout());
        }
    }
}

// SAFETY: the stack is plain memory exclusively owned by its task record.
unsafe impl Send for TaskStack {}

/// Task control block.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) state: TaskState,

    /// Tick at which a sleeping task becomes runnable; zero while running.
    pub(crate) wakeup_tick: u64,

    /// Saved context to resume. Null for the bootstrap task until its first
    /// tick records where it was interrupted.
    pub(crate) frame_ptr: *mut SavedRegisters,

    /// `None` for the bootstrap task, which runs on the boot stack.
    pub(crate) stack: Option<TaskStack>,

    /// Stack top handed to the resume path (TSS.RSP0).
    pub(crate) kernel_stack_top: u64,

    pub(crate) address_space: AddressSpace,
}

impl Task {
    /// Control block for a created task running on its own `stack`.
    pub(crate) fn spawned(
        id: TaskId,
        name: &str,
        frame_ptr: *mut SavedRegisters,
        stack: TaskStack,
        address_space: AddressSpace,
    ) -> Self {
        let kernel_stack_top = stack.top();
        Self {
            id,
            name: truncate_name(name),
            state: TaskState::Running,
            wakeup_tick: 0,
            frame_ptr,
            stack: Some(stack),
            kernel_stack_top,
            address_space,
        }
    }

    /// Control block adopting the context that is already executing.
    pub(crate) fn bootstrap(boot_stack_top: u64, address_space: AddressSpace) -> Self {
        Self {
            id: TaskId::BOOTSTRAP,
            name: String::from("kernel_task"),
            state: TaskState::Running,
            wakeup_tick: 0,
            frame_ptr: ptr::null_mut(),
            stack: None,
            kernel_stack_top: boot_stack_top,
            address_space,
        }
    }

    pub(crate) fn is_sleeping(&self) -> bool {
        self.state == TaskState::Sleeping
    }
}

// SAFETY:
// - `frame_ptr` points into the task's own stack (or the boot stack) and is
//   only read or written while holding the scheduler lock.
unsafe impl Send for Task {}

fn truncate_name(name: &str) -> String {
    if name.len() <= TASK_NAME_MAX {
        return String::from(name);
    }
    let mut end = TASK_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}
