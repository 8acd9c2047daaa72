//! Deferred-work queues drained by dedicated kernel tasks.
//!
//! Interrupt handlers should not do long-running work with the system
//! frozen. Instead they hand a callback plus a copy of its input to a
//! [`Worker`]; the worker's own task runs the callbacks later in ordinary
//! task context, one at a time.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;

use crate::list::{List, NodeId};
use crate::scheduler::{self, TaskId};
use crate::sync::spinlock::SpinLock;

/// Longest worker name accepted, in bytes.
pub const WORKER_NAME_MAX: usize = 31;

/// Deferred callback. Receives the payload copied at submission time.
pub type WorkFn = fn(&[u8]);

/// Which pending item a worker runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Submission order, regardless of priority.
    #[default]
    Fifo,

    /// Highest priority first (255 highest, 0 lowest). Ties run in
    /// submission order.
    HighestPriority,
}

struct DeferredWork {
    callback: WorkFn,
    payload: Box<[u8]>,
    priority: u8,
}

/// A named queue of deferred work with its own draining task.
pub struct Worker {
    name: String,
    task: AtomicU32,
    policy: SelectionPolicy,
    items: SpinLock<List<DeferredWork>>,
}

extern "C" fn worker_task_entry(arg: usize) {
    // SAFETY:
    // - `arg` is the address of the leaked `Worker` passed by `create_with_policy`,
    //   which stays valid for the rest of the kernel's lifetime.
    let worker = unsafe { &*(arg as *const Worker) };
    worker.drain_loop()
}

impl Worker {
    /// Creates a FIFO worker and spawns its draining task under `name`.
    pub fn create(name: &str) -> &'static Worker {
        Self::create_with_policy(name, SelectionPolicy::Fifo)
    }

    /// Creates a worker that picks pending items according to `policy`.
    ///
    /// Workers live for the rest of the kernel's lifetime.
    pub fn create_with_policy(name: &str, policy: SelectionPolicy) -> &'static Worker {
        assert!(
            name.len() <= WORKER_NAME_MAX,
            "worker: name {:?} is longer than {} bytes",
            name,
            WORKER_NAME_MAX
        );

        let worker: &'static Worker = Box::leak(Box::new(Worker {
            name: String::from(name),
            task: AtomicU32::new(0),
            policy,
            items: SpinLock::new(List::new()),
        }));

        let task = scheduler::spawn_with_arg(
            worker_task_entry,
            worker as *const Worker as usize,
            name,
        );
        worker.task.store(task.as_u32(), Ordering::Release);

        log::info!(
            target: "worker",
            "created worker {} (task {}, {:?})",
            name,
            task,
            policy
        );
        worker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the task draining this worker.
    pub fn task_id(&self) -> TaskId {
        TaskId::new(self.task.load(Ordering::Acquire))
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Queues `callback` to run later with a private copy of `data`.
    ///
    /// An empty payload is a usage violation.
    pub fn add(&self, callback: WorkFn, data: &[u8], priority: u8) {
        assert!(
            !data.is_empty(),
            "worker {}: deferred work needs a non-empty payload",
            self.name
        );

        let item = DeferredWork {
            callback,
            payload: Box::from(data),
            priority,
        };
        self.items.lock().append(item);
    }

    /// Number of items waiting to run.
    pub fn pending(&self) -> usize {
        self.items.lock().len()
    }

    /// Removes the next item and runs it.
    ///
    /// The item is unlinked before its callback runs, so the callback may
    /// queue more work on the same worker. Returns `false` if nothing was
    /// pending.
    pub fn run_next(&self) -> bool {
        let item = {
            let mut items = self.items.lock();
            let Some(node) = select(&items, self.policy) else {
                return false;
            };
            items.remove(node)
        };

        log::trace!(
            target: "worker",
            "{}: running item (priority {}, {} bytes)",
            self.name,
            item.priority,
            item.payload.len()
        );
        (item.callback)(&item.payload);
        true
    }

    /// Body of the worker task: yields while idle, otherwise runs one item
    /// at a time.
    pub fn drain_loop(&self) -> ! {
        loop {
            while self.pending() == 0 {
                scheduler::yield_now();
            }
            self.run_next();
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("task", &self.task_id())
            .field("policy", &self.policy)
            .field("pending", &self.pending())
            .finish()
    }
}

fn select(items: &List<DeferredWork>, policy: SelectionPolicy) -> Option<NodeId> {
    let head = items.head()?;
    match policy {
        SelectionPolicy::Fifo => Some(head),
        SelectionPolicy::HighestPriority => {
            let mut best = head;
            let mut best_priority = items.get(head)?.priority;
            for (node, item) in items.iter() {
                if item.priority > best_priority {
                    best = node;
                    best_priority = item.priority;
                }
            }
            Some(best)
        }
    }
}
