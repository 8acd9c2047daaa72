//! Scheduler module facade.
//!
//! Public scheduler API is implemented in `roundrobin.rs` and re-exported here
//! so `crate::scheduler::*` call sites stay clean. Task control blocks and
//! stacks live in `task.rs`.

mod roundrobin;
mod task;

pub use roundrobin::*;
pub use task::{AddressSpace, TaskId, TaskStack, TaskState, TASK_NAME_MAX, TASK_STACK_SIZE};
