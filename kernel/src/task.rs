//! Tasks: the task control block and its lifecycle (§3, §4.2).
use core::cell::Cell;

use crate::error::Error;
use crate::pool::Id;
use crate::priority::Priority;
use crate::wait::WaitQueue;

/// Handle to a task, stable for the task's entire lifetime (it is never
/// reused, even after the task is deleted).
pub type TaskId = Id;

/// Maximum number of visible bytes in a task name (§6: "up to 15 visible
/// bytes plus terminator").
pub const TASK_NAME_CAP: usize = 15;

/// A fixed-capacity byte string used for task names, matching the
/// persisted-format note in §6 — a short, stack-friendly buffer rather
/// than a heap-allocated `String`.
#[derive(Clone, Copy)]
pub struct TaskName {
    bytes: [u8; TASK_NAME_CAP],
    len: u8,
}

impl TaskName {
    pub const fn empty() -> Self {
        TaskName {
            bytes: [0; TASK_NAME_CAP],
            len: 0,
        }
    }

    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; TASK_NAME_CAP];
        let src = name.as_bytes();
        let n = src.len().min(TASK_NAME_CAP);
        bytes[..n].copy_from_slice(&src[..n]);
        TaskName {
            bytes,
            len: n as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl core::fmt::Debug for TaskName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
}

/// The outcome delivered to a task that was parked in a wait queue: either
/// it was woken by the resource it was waiting on, or its deadline
/// expired first.
pub type WaitOutcome = Result<(), Error>;

/// The task control block. Allocated once (from [`crate::pool::Pool`]) and
/// never freed; `delete` only changes `state`.
pub struct TaskCb {
    pub(crate) name: TaskName,
    pub(crate) entry: fn(usize),
    pub(crate) arg: usize,

    /// Saved stack pointer. Opaque to everything except the active
    /// [`crate::port::Port`] implementation.
    pub(crate) sp: Cell<*mut u8>,

    pub(crate) state: Cell<TaskState>,
    pub(crate) base_priority: Cell<Priority>,
    pub(crate) effective_priority: Cell<Priority>,

    pub(crate) time_slice: Cell<u32>,
    pub(crate) runtime_ticks: Cell<u64>,

    /// Ready-queue (or, for the idle task, "nowhere") intrusive links.
    pub(crate) rq_next: Cell<Option<TaskId>>,
    pub(crate) rq_prev: Cell<Option<TaskId>>,

    /// Resource wait-queue intrusive links, valid only while `wait_queue`
    /// is `Some`.
    pub(crate) wq_next: Cell<Option<TaskId>>,
    pub(crate) wq_prev: Cell<Option<TaskId>>,
    pub(crate) wait_queue: Cell<Option<&'static WaitQueue>>,

    /// Global timeout-list intrusive links, valid only while `deadline` is
    /// `Some`.
    pub(crate) to_next: Cell<Option<TaskId>>,
    pub(crate) to_prev: Cell<Option<TaskId>>,
    pub(crate) deadline: Cell<Option<u64>>,

    pub(crate) wait_result: Cell<WaitOutcome>,
}

// Safety: every field is only ever touched from inside a critical section
// (see `crate::critical::CriticalCell`), which gives exclusive access on
// the single-core targets this kernel supports.
unsafe impl Sync for TaskCb {}

impl TaskCb {
    pub(crate) fn new(
        name: TaskName,
        entry: fn(usize),
        arg: usize,
        priority: Priority,
        time_slice: u32,
        initial_sp: *mut u8,
    ) -> Self {
        TaskCb {
            name,
            entry,
            arg,
            sp: Cell::new(initial_sp),
            state: Cell::new(TaskState::Ready),
            base_priority: Cell::new(priority),
            effective_priority: Cell::new(priority),
            time_slice: Cell::new(time_slice),
            runtime_ticks: Cell::new(0),
            rq_next: Cell::new(None),
            rq_prev: Cell::new(None),
            wq_next: Cell::new(None),
            wq_prev: Cell::new(None),
            wait_queue: Cell::new(None),
            to_next: Cell::new(None),
            to_prev: Cell::new(None),
            deadline: Cell::new(None),
            wait_result: Cell::new(Ok(())),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority.get()
    }

    pub fn effective_priority(&self) -> Priority {
        self.effective_priority.get()
    }

    pub fn runtime_ticks(&self) -> u64 {
        self.runtime_ticks.get()
    }

    pub fn entry_point(&self) -> (fn(usize), usize) {
        (self.entry, self.arg)
    }
}
