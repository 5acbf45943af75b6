//! The ready set: 256 per-priority FIFO queues selected by a hierarchical
//! bitmap (§3, §4.1 "Selection").
//!
//! A naive "scan 256 slots" `pick_next` is O(256) in the worst case. The
//! source this crate draws its ready-queue shape from instead keeps one
//! bit per priority and finds the lowest set bit with a trailing-zero-count
//! bit scan, making selection a handful of word operations regardless of
//! how many priority levels are actually occupied.
use core::cell::Cell;

use crate::pool::Pool;
use crate::priority::Priority;
use crate::task::{TaskCb, TaskId};

const WORDS: usize = 4; // 4 * 64 = 256 priority levels

/// Bitmap of occupied priority slots, one bit per priority, grouped into
/// 64-bit words so `find_set` is a constant number of `trailing_zeros`
/// calls.
struct PrioBitmap {
    words: [Cell<u64>; WORDS],
}

impl PrioBitmap {
    const fn new() -> Self {
        PrioBitmap {
            words: [Cell::new(0), Cell::new(0), Cell::new(0), Cell::new(0)],
        }
    }

    fn set(&self, prio: usize) {
        let (w, b) = (prio / 64, prio % 64);
        self.words[w].set(self.words[w].get() | (1u64 << b));
    }

    fn clear(&self, prio: usize) {
        let (w, b) = (prio / 64, prio % 64);
        self.words[w].set(self.words[w].get() & !(1u64 << b));
    }

    fn get(&self, prio: usize) -> bool {
        let (w, b) = (prio / 64, prio % 64);
        (self.words[w].get() >> b) & 1 != 0
    }

    /// Lowest set bit overall (i.e. numerically highest priority with a
    /// ready task), or `None` if the bitmap is empty.
    fn find_set(&self) -> Option<usize> {
        for (w, word) in self.words.iter().enumerate() {
            let bits = word.get();
            if bits != 0 {
                return Some(w * 64 + bits.trailing_zeros() as usize);
            }
        }
        None
    }
}

/// One FIFO queue per priority level, selected by [`PrioBitmap`].
pub struct ReadyQueue {
    bitmap: PrioBitmap,
    heads: [Cell<Option<TaskId>>; 256],
    tails: [Cell<Option<TaskId>>; 256],
}

impl ReadyQueue {
    pub const fn new() -> Self {
        ReadyQueue {
            bitmap: PrioBitmap::new(),
            heads: [const { Cell::new(None) }; 256],
            tails: [const { Cell::new(None) }; 256],
        }
    }

    /// Insert `id` at the tail of its priority slot. `id` must not already
    /// be linked into the ready queue or any wait queue.
    pub fn push_back<const N: usize>(&self, tasks: &Pool<TaskCb, N>, id: TaskId) {
        let task = tasks.get(id);
        let prio = task.effective_priority.get().as_index();
        task.rq_next.set(None);
        task.rq_prev.set(self.tails[prio].get());
        match self.tails[prio].get() {
            Some(tail_id) => tasks.get(tail_id).rq_next.set(Some(id)),
            None => {
                self.heads[prio].set(Some(id));
                self.bitmap.set(prio);
            }
        }
        self.tails[prio].set(Some(id));
    }

    /// Remove `id` from the priority slot it is currently linked in. Must
    /// be called with the priority the task was enqueued at (callers that
    /// changed a task's priority while it was ready must remove the task
    /// *before* updating `effective_priority`, or pass the old priority
    /// explicitly — see [`crate::sched::Kernel::set_priority`]).
    pub fn remove<const N: usize>(&self, tasks: &Pool<TaskCb, N>, id: TaskId, prio: Priority) {
        let task = tasks.get(id);
        let prio = prio.as_index();
        match task.rq_prev.get() {
            Some(prev_id) => tasks.get(prev_id).rq_next.set(task.rq_next.get()),
            None => self.heads[prio].set(task.rq_next.get()),
        }
        match task.rq_next.get() {
            Some(next_id) => tasks.get(next_id).rq_prev.set(task.rq_prev.get()),
            None => self.tails[prio].set(task.rq_prev.get()),
        }
        task.rq_next.set(None);
        task.rq_prev.set(None);
        if self.heads[prio].get().is_none() {
            self.bitmap.clear(prio);
        }
    }

    /// Pop the head of the highest-priority non-empty slot.
    pub fn pop_front<const N: usize>(&self, tasks: &Pool<TaskCb, N>) -> Option<TaskId> {
        let prio = self.bitmap.find_set()?;
        let id = self.heads[prio].get().expect("bitmap/queue out of sync");
        let task = tasks.get(id);
        self.heads[prio].set(task.rq_next.get());
        match task.rq_next.get() {
            Some(next_id) => tasks.get(next_id).rq_prev.set(None),
            None => self.tails[prio].set(None),
        }
        task.rq_next.set(None);
        task.rq_prev.set(None);
        if self.heads[prio].get().is_none() {
            self.bitmap.clear(prio);
        }
        Some(id)
    }

    /// Highest-priority occupied slot, without removing anything.
    pub fn highest_priority(&self) -> Option<Priority> {
        self.bitmap.find_set().map(|p| Priority::new(p as u8))
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.find_set().is_none()
    }

    #[cfg(test)]
    fn slot_is_occupied(&self, prio: usize) -> bool {
        self.bitmap.get(prio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_numeric_priority_wins() {
        let bitmap = PrioBitmap::new();
        bitmap.set(128);
        bitmap.set(64);
        bitmap.set(255);
        assert_eq!(bitmap.find_set(), Some(64));
        bitmap.clear(64);
        assert_eq!(bitmap.find_set(), Some(128));
    }

    #[test]
    fn bitmap_spans_all_four_words() {
        let bitmap = PrioBitmap::new();
        for p in [0usize, 63, 64, 127, 128, 191, 192, 255] {
            bitmap.set(p);
            assert!(bitmap.get(p));
        }
        assert_eq!(bitmap.find_set(), Some(0));
    }

    #[test]
    fn empty_bitmap_finds_nothing() {
        assert!(ReadyQueue::new().is_empty());
    }

    /// `find_set` must agree with a brute-force lowest-set-bit scan for any
    /// sequence of sets, regardless of how the 256 slots happen to fall
    /// across the four words.
    #[quickcheck_macros::quickcheck]
    fn find_set_matches_the_lowest_numeric_bit_set(prios: std::vec::Vec<u8>) -> bool {
        let bitmap = PrioBitmap::new();
        let mut expected: Option<usize> = None;
        for p in prios {
            bitmap.set(p as usize);
            expected = Some(expected.map_or(p as usize, |e| e.min(p as usize)));
        }
        bitmap.find_set() == expected
    }

    /// Clearing every bit that was set leaves the bitmap indistinguishable
    /// from a fresh one, no matter the order bits were set and cleared in.
    #[quickcheck_macros::quickcheck]
    fn clearing_every_set_bit_empties_the_bitmap(prios: std::vec::Vec<u8>) -> bool {
        let bitmap = PrioBitmap::new();
        for p in &prios {
            bitmap.set(*p as usize);
        }
        for p in &prios {
            bitmap.clear(*p as usize);
        }
        bitmap.find_set().is_none()
    }
}
