//! The wait-queue and timeout substrate shared by every blocking primitive
//! (mutex, semaphore, condition variable, event group, message queue) and
//! by plain `delay` (§4.2, §4.3–§4.7, §5).
//!
//! A task can be linked into at most one *resource* wait queue (the FIFO a
//! mutex/semaphore/etc. parks its waiters on) and, independently, into the
//! kernel's single global *timeout list* (sorted ascending by deadline).
//! `delay` uses only the timeout list; every other blocking call uses both.
//! Waking a task unlinks it from whichever of the two it is currently in,
//! using the doubly-linked `wq_*`/`to_*` fields on [`TaskCb`] — no search
//! is required either way.
use core::cell::Cell;

use crate::pool::Pool;
use crate::task::{TaskCb, TaskId, TaskState, WaitOutcome};

/// A FIFO queue of blocked tasks, owned by a synchronization primitive
/// (mutex, semaphore, condition variable, event group, or message queue).
/// `'static` because every primitive that owns one is expected to be a
/// `'static` object (typically a `static`), matching the spec's "statically
/// allocated by the caller" ownership rule for kernel objects.
pub struct WaitQueue {
    head: Cell<Option<TaskId>>,
    tail: Cell<Option<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            head: Cell::new(None),
            tail: Cell::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    pub fn peek_front(&self) -> Option<TaskId> {
        self.head.get()
    }

    fn push_back<const N: usize>(&'static self, tasks: &Pool<TaskCb, N>, id: TaskId) {
        let task = tasks.get(id);
        task.wq_next.set(None);
        task.wq_prev.set(self.tail.get());
        match self.tail.get() {
            Some(tail_id) => tasks.get(tail_id).wq_next.set(Some(id)),
            None => self.head.set(Some(id)),
        }
        self.tail.set(Some(id));
        task.wait_queue.set(Some(self));
    }

    fn unlink<const N: usize>(&self, tasks: &Pool<TaskCb, N>, id: TaskId) {
        let task = tasks.get(id);
        match task.wq_prev.get() {
            Some(prev_id) => tasks.get(prev_id).wq_next.set(task.wq_next.get()),
            None => self.head.set(task.wq_next.get()),
        }
        match task.wq_next.get() {
            Some(next_id) => tasks.get(next_id).wq_prev.set(task.wq_prev.get()),
            None => self.tail.set(task.wq_prev.get()),
        }
        task.wq_next.set(None);
        task.wq_prev.set(None);
        task.wait_queue.set(None);
    }

    fn pop_front<const N: usize>(&self, tasks: &Pool<TaskCb, N>) -> Option<TaskId> {
        let id = self.head.get()?;
        self.unlink(tasks, id);
        Some(id)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel's single global timeout list: every blocked task with a
/// finite deadline, sorted ascending by `deadline`.
pub(crate) struct TimeoutList {
    head: Cell<Option<TaskId>>,
}

impl TimeoutList {
    pub const fn new() -> Self {
        TimeoutList {
            head: Cell::new(None),
        }
    }

    pub fn insert<const N: usize>(&self, tasks: &Pool<TaskCb, N>, id: TaskId, deadline: u64) {
        let task = tasks.get(id);
        task.deadline.set(Some(deadline));

        let mut cursor = self.head.get();
        let mut prev: Option<TaskId> = None;
        while let Some(cur_id) = cursor {
            let cur_deadline = tasks.get(cur_id).deadline.get().unwrap();
            if cur_deadline > deadline {
                break;
            }
            prev = Some(cur_id);
            cursor = tasks.get(cur_id).to_next.get();
        }

        task.to_prev.set(prev);
        task.to_next.set(cursor);
        match prev {
            Some(prev_id) => tasks.get(prev_id).to_next.set(Some(id)),
            None => self.head.set(Some(id)),
        }
        if let Some(next_id) = cursor {
            tasks.get(next_id).to_prev.set(Some(id));
        }
    }

    pub fn remove<const N: usize>(&self, tasks: &Pool<TaskCb, N>, id: TaskId) {
        let task = tasks.get(id);
        if task.deadline.get().is_none() {
            return;
        }
        match task.to_prev.get() {
            Some(prev_id) => tasks.get(prev_id).to_next.set(task.to_next.get()),
            None => self.head.set(task.to_next.get()),
        }
        if let Some(next_id) = task.to_next.get() {
            tasks.get(next_id).to_prev.set(task.to_prev.get());
        }
        task.to_next.set(None);
        task.to_prev.set(None);
        task.deadline.set(None);
    }

    /// Pop every task whose deadline has passed (`deadline <= now`),
    /// calling `on_expire` for each. The list is sorted, so this stops at
    /// the first deadline still in the future.
    pub fn expire_due<const N: usize>(
        &self,
        tasks: &Pool<TaskCb, N>,
        now: u64,
        mut on_expire: impl FnMut(TaskId),
    ) {
        while let Some(id) = self.head.get() {
            let task = tasks.get(id);
            if task.deadline.get().unwrap() > now {
                break;
            }
            self.remove(tasks, id);
            on_expire(id);
        }
    }
}

/// Park the running task on `queue` (if given — `delay` passes `None`) and,
/// if `deadline` is `Some`, also register it on the timeout list. Marks the
/// task `Blocked`. Does not itself trigger a reschedule; callers drive
/// that through [`crate::sched::Kernel`].
pub(crate) fn park<const N: usize>(
    tasks: &Pool<TaskCb, N>,
    timeouts: &TimeoutList,
    queue: Option<&'static WaitQueue>,
    id: TaskId,
    deadline: Option<u64>,
) {
    let task = tasks.get(id);
    task.state.set(TaskState::Blocked);
    task.wait_result.set(Ok(()));
    if let Some(queue) = queue {
        queue.push_back(tasks, id);
    }
    if let Some(deadline) = deadline {
        timeouts.insert(tasks, id, deadline);
    }
}

/// Wake `id` with `outcome`, unlinking it from whichever of {resource wait
/// queue, timeout list} it currently occupies, and mark it `Ready`. The
/// caller is responsible for re-enqueuing it onto the ready set.
pub(crate) fn wake<const N: usize>(
    tasks: &Pool<TaskCb, N>,
    timeouts: &TimeoutList,
    id: TaskId,
    outcome: WaitOutcome,
) {
    let task = tasks.get(id);
    if let Some(queue) = task.wait_queue.get() {
        queue.unlink(tasks, id);
    }
    timeouts.remove(tasks, id);
    task.wait_result.set(outcome);
    task.state.set(TaskState::Ready);
}

/// Pop and wake the head of `queue` with `outcome`. Returns the woken
/// task, if any, so the caller can enqueue it onto the ready set.
pub(crate) fn wake_one<const N: usize>(
    tasks: &Pool<TaskCb, N>,
    timeouts: &TimeoutList,
    queue: &'static WaitQueue,
    outcome: WaitOutcome,
) -> Option<TaskId> {
    let id = queue.pop_front(tasks)?;
    timeouts.remove(tasks, id);
    tasks.get(id).wait_result.set(outcome);
    tasks.get(id).state.set(TaskState::Ready);
    Some(id)
}

/// Unlink and return the head of `queue`, touching neither `state` nor
/// `wait_result`. Used by [`crate::mutex`], which must know the identity
/// of the next owner before deciding how to wake it.
pub(crate) fn pop_waiter<const N: usize>(
    tasks: &Pool<TaskCb, N>,
    queue: &WaitQueue,
) -> Option<TaskId> {
    queue.pop_front(tasks)
}

/// Unlink `id` from whichever resource wait queue and/or the timeout list
/// it currently occupies, touching neither `state` nor `wait_result`. Used
/// when a task is being torn down (deleted) rather than woken.
pub(crate) fn unlink_from_all<const N: usize>(
    tasks: &Pool<TaskCb, N>,
    timeouts: &TimeoutList,
    id: TaskId,
) {
    let task = tasks.get(id);
    if let Some(queue) = task.wait_queue.get() {
        queue.unlink(tasks, id);
    }
    timeouts.remove(tasks, id);
}

/// Called for a task popped off the timeout list by
/// [`TimeoutList::expire_due`] (which has already removed it from that
/// list). If it was also parked on a resource wait queue (a timed
/// `lock`/`wait`/etc., as opposed to a plain `delay`), unlinks it from that
/// queue too and reports `Timeout`; a plain delay reports success. Marks
/// the task `Ready`; the caller is responsible for enqueuing it.
pub(crate) fn finish_timeout<const N: usize>(tasks: &Pool<TaskCb, N>, id: TaskId) {
    let task = tasks.get(id);
    let outcome = match task.wait_queue.get() {
        Some(queue) => {
            queue.unlink(tasks, id);
            Err(crate::error::Error::Timeout)
        }
        None => Ok(()),
    };
    task.wait_result.set(outcome);
    task.state.set(TaskState::Ready);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use crate::task::TaskName;

    fn make_pool() -> Pool<TaskCb, 4> {
        let pool: Pool<TaskCb, 4> = Pool::new();
        for _ in 0..4 {
            pool.try_push(TaskCb::new(
                TaskName::empty(),
                |_| {},
                0,
                Priority::NORMAL,
                10,
                core::ptr::null_mut(),
            ))
            .unwrap();
        }
        pool
    }

    #[test]
    fn timeout_list_stays_sorted() {
        let pool = make_pool();
        let ids: alloc_free_vec::Vec4<TaskId> = {
            let mut v = alloc_free_vec::Vec4::new();
            for id in pool.iter_ids() {
                v.push(id);
            }
            v
        };
        let timeouts = TimeoutList::new();
        timeouts.insert(&pool, ids.get(0), 300);
        timeouts.insert(&pool, ids.get(1), 100);
        timeouts.insert(&pool, ids.get(2), 200);

        let mut order = alloc_free_vec::Vec4::new();
        timeouts.expire_due(&pool, u64::MAX, |id| order.push(id));
        assert_eq!(order.get(0), ids.get(1));
        assert_eq!(order.get(1), ids.get(2));
        assert_eq!(order.get(2), ids.get(0));
    }

    #[test]
    fn expire_due_stops_at_future_deadline() {
        let pool = make_pool();
        let ids: alloc_free_vec::Vec4<TaskId> = {
            let mut v = alloc_free_vec::Vec4::new();
            for id in pool.iter_ids() {
                v.push(id);
            }
            v
        };
        let timeouts = TimeoutList::new();
        timeouts.insert(&pool, ids.get(0), 100);
        timeouts.insert(&pool, ids.get(1), 500);

        let mut order = alloc_free_vec::Vec4::new();
        timeouts.expire_due(&pool, 100, |id| order.push(id));
        assert_eq!(order.len(), 1);
        assert_eq!(order.get(0), ids.get(0));
    }

    /// A tiny fixed-capacity vec, avoiding a dependency on `alloc` just for
    /// test bookkeeping.
    mod alloc_free_vec {
        pub struct Vec4<T> {
            items: [Option<T>; 4],
            len: usize,
        }

        impl<T: Copy> Vec4<T> {
            pub fn new() -> Self {
                Vec4 {
                    items: [None; 4],
                    len: 0,
                }
            }

            pub fn push(&mut self, value: T) {
                self.items[self.len] = Some(value);
                self.len += 1;
            }

            pub fn get(&self, i: usize) -> T {
                self.items[i].unwrap()
            }

            pub fn len(&self) -> usize {
                self.len
            }
        }
    }
}
