//! The scheduler core and task lifecycle (§4.1, §4.2).
//!
//! `Kernel<N, P>` owns every piece of global state listed in §3: the task
//! pool, the ready set, the timeout list, the software-timer list, the
//! current-task pointer, and the tick and context-switch counters. `N` is
//! the task-pool capacity and `P` is the platform [`Port`]; both are fixed
//! at compile time, so a `Kernel` is typically declared as a single
//! `'static` object (`static KERNEL: Kernel<16, MyPort> = Kernel::new(10)`)
//! and every task, mutex, and timer in the program refers to it by
//! `&'static` reference.
use core::cell::Cell;
use core::marker::PhantomData;

use crate::critical;
use crate::error::Error;
use crate::pool::Pool;
use crate::port::Port;
use crate::priority::Priority;
use crate::readyqueue::ReadyQueue;
use crate::task::{TaskCb, TaskId, TaskName, TaskState, WaitOutcome};
use crate::timer::{Timer, TimerList};
use crate::wait::{self, TimeoutList, WaitQueue};

/// A duration or deadline expressed in ticks. For blocking calls, `0` means
/// "wait indefinitely" (§4.3, §5); the one exception is [`Kernel::delay`],
/// where `0` means "yield" (§4.2).
pub type Ticks = u32;

/// The kernel: task pool, ready set, and scheduling state, generic over the
/// task-pool capacity `N` and the platform port `P`.
pub struct Kernel<const N: usize, P: Port> {
    tasks: Pool<TaskCb, N>,
    ready: ReadyQueue,
    timeouts: TimeoutList,
    timers: TimerList,
    current: Cell<Option<TaskId>>,
    tick: Cell<u64>,
    ctx_switches: Cell<u64>,
    quantum: Ticks,
    _port: PhantomData<P>,
}

// Safety: every field is either already self-synchronizing (`Pool`,
// `ReadyQueue`, `TimeoutList`, `TimerList` are all `Cell`-based and touched
// only from inside a critical section) or a plain `Cell` that this type's
// own methods only ever touch the same way.
unsafe impl<const N: usize, P: Port> Sync for Kernel<N, P> {}

impl<const N: usize, P: Port> Kernel<N, P> {
    pub const fn new(quantum: Ticks) -> Self {
        Kernel {
            tasks: Pool::new(),
            ready: ReadyQueue::new(),
            timeouts: TimeoutList::new(),
            timers: TimerList::new(),
            current: Cell::new(None),
            tick: Cell::new(0),
            ctx_switches: Cell::new(0),
            quantum,
            _port: PhantomData,
        }
    }

    /// The entry point handed to [`Kernel::create_task`] for the mandatory
    /// idle task (`Priority::IDLE`). Spins in the platform's lowest-power
    /// wait state forever; never blocks or returns.
    fn idle_main(_: usize) {
        loop {
            P::idle_wait_for_interrupt();
        }
    }

    pub fn idle_entry(&self) -> fn(usize) {
        Self::idle_main
    }

    pub fn quantum(&self) -> Ticks {
        self.quantum
    }

    pub fn tick_count(&self) -> u64 {
        self.tick.get()
    }

    pub fn context_switch_count(&self) -> u64 {
        self.ctx_switches.get()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&'static self, id: TaskId) -> &'static TaskCb {
        self.tasks.get(id)
    }

    /// Currently running task. Panics if called before [`Kernel::start`].
    pub fn current_task(&'static self) -> TaskId {
        self.current.get().expect("kernel not started")
    }

    /// Create a task (§4.2 "create"). `stack` must outlive the program (in
    /// practice, a `'static mut` array) since only the computed stack
    /// pointer is retained, not the slice itself. The new task is linked
    /// into the ready set immediately.
    pub fn create_task(
        &'static self,
        name: &str,
        entry: fn(usize),
        arg: usize,
        priority: Priority,
        stack: &'static mut [u8],
    ) -> Result<TaskId, Error> {
        if stack.is_empty() {
            return Err(Error::InvalidParam);
        }
        let sp = P::initial_stack_frame(stack, entry, arg);
        let tcb = TaskCb::new(TaskName::new(name), entry, arg, priority, self.quantum, sp);

        let id = {
            let _g = critical::enter::<P>();
            let id = self.tasks.try_push(tcb).ok_or(Error::NoMemory)?;
            self.ready.push_back(&self.tasks, id);
            id
        };
        crate::trace::task_created(id, name);
        Ok(id)
    }

    /// Start the scheduler (§4.1 "Contract"). Never returns: control passes
    /// permanently to whichever task is selected first (the only task that
    /// exists, on a minimal system, is the idle task).
    pub fn start(&'static self, tick_rate_hz: u32) -> ! {
        P::tick_source_init(tick_rate_hz);

        let next_id = {
            let _g = critical::enter::<P>();
            let id = self
                .ready
                .pop_front(&self.tasks)
                .expect("create at least one task before calling start");
            self.tasks.get(id).state.set(TaskState::Running);
            self.current.set(Some(id));
            id
        };

        let next_sp = self.tasks.get(next_id).sp.as_ptr();
        let mut discarded_sp: *mut u8 = core::ptr::null_mut();
        // Safety: `next_sp` was synthesized by `create_task` via
        // `Port::initial_stack_frame` and has not been switched into yet.
        // There is no real "previous" task on first entry; `discarded_sp`
        // is a throwaway slot satisfying the contract's shape.
        unsafe { P::context_switch(&mut discarded_sp, next_sp) };
        unreachable!("a task's stack frame must never return into start()");
    }

    /// Periodic tick handler (§4.1 policy (a)-(f)), called from the
    /// platform's timer interrupt.
    pub fn tick_hook(&'static self) {
        let current_id = self.current.get().expect("kernel not started");

        let now = {
            let _g = critical::enter::<P>();
            let now = self.tick.get() + 1;
            self.tick.set(now);
            let cur = self.tasks.get(current_id);
            cur.runtime_ticks.set(cur.runtime_ticks.get() + 1);
            if cur.time_slice.get() > 0 {
                cur.time_slice.set(cur.time_slice.get() - 1);
            }
            now
        };

        self.expire_timeouts(now);
        self.timers.process::<P>(now);
        self.dispatch(true);
    }

    /// Voluntarily give up the remainder of the current time slice (§4.2
    /// "yield").
    pub fn yield_now(&'static self) {
        {
            let _g = critical::enter::<P>();
            let id = self.current.get().expect("kernel not started");
            self.tasks.get(id).state.set(TaskState::Ready);
        }
        self.reschedule();
    }

    /// Block the running task for `ticks` (§4.2 "delay"). `0` behaves as
    /// [`Kernel::yield_now`].
    pub fn delay(&'static self, ticks: Ticks) -> Result<(), Error> {
        if ticks == 0 {
            self.yield_now();
            return Ok(());
        }
        self.block_on(None, ticks)
    }

    pub fn suspend(&'static self, id: TaskId) -> Result<(), Error> {
        let is_current;
        {
            let _g = critical::enter::<P>();
            let task = self.tasks.get(id);
            match task.state.get() {
                TaskState::Ready => {
                    self.ready
                        .remove(&self.tasks, id, task.effective_priority.get());
                    task.state.set(TaskState::Suspended);
                }
                TaskState::Running => task.state.set(TaskState::Suspended),
                TaskState::Suspended => return Err(Error::Busy),
                TaskState::Blocked | TaskState::Terminated => return Err(Error::InvalidParam),
            }
            is_current = self.current.get() == Some(id);
        }
        // Suspending the running task forces a yield (§4.2).
        if is_current {
            self.reschedule();
        }
        Ok(())
    }

    pub fn resume(&'static self, id: TaskId) -> Result<(), Error> {
        {
            let _g = critical::enter::<P>();
            let task = self.tasks.get(id);
            if task.state.get() != TaskState::Suspended {
                return Err(Error::InvalidParam);
            }
            task.state.set(TaskState::Ready);
            self.ready.push_back(&self.tasks, id);
        }
        self.maybe_preempt();
        Ok(())
    }

    /// Delete a task (§4.2 "delete"). When `id` is the running task, this
    /// does not return: the caller's own stack frame is never resumed
    /// (REDESIGN §9 item 4 — the source kept executing on the dead task's
    /// stack until the next yield, which this implementation treats as a
    /// bug rather than a behavior to preserve).
    pub fn delete(&'static self, id: TaskId) -> Result<(), Error> {
        let is_current = self.current.get() == Some(id);
        {
            let _g = critical::enter::<P>();
            let task = self.tasks.get(id);
            match task.state.get() {
                TaskState::Terminated => return Err(Error::InvalidParam),
                TaskState::Ready => {
                    self.ready
                        .remove(&self.tasks, id, task.effective_priority.get());
                }
                TaskState::Blocked => {
                    wait::unlink_from_all(&self.tasks, &self.timeouts, id);
                }
                TaskState::Suspended | TaskState::Running => {}
            }
            task.state.set(TaskState::Terminated);
        }
        crate::trace::task_deleted(id);
        if is_current {
            self.reschedule();
            unreachable!("a terminated task's context is never resumed");
        }
        Ok(())
    }

    /// Set both base and effective priority (§4.2). Re-links the task into
    /// its new ready-queue slot if it is currently `Ready`, and checks for
    /// preemption either way.
    pub fn set_priority(&'static self, id: TaskId, priority: Priority) -> Result<(), Error> {
        {
            let _g = critical::enter::<P>();
            let task = self.tasks.get(id);
            if task.state.get() == TaskState::Terminated {
                return Err(Error::InvalidParam);
            }
            let old_eff = task.effective_priority.get();
            task.base_priority.set(priority);
            task.effective_priority.set(priority);
            if task.state.get() == TaskState::Ready && old_eff != priority {
                self.ready.remove(&self.tasks, id, old_eff);
                self.ready.push_back(&self.tasks, id);
            }
        }
        self.maybe_preempt();
        Ok(())
    }

    /// Raise (never lower) a task's effective priority without touching
    /// its base priority (§4.2 "raise_priority"), used by [`crate::mutex`]
    /// for priority inheritance. A no-op if `priority` is not numerically
    /// higher than the task's current effective priority.
    pub fn raise_priority(&'static self, id: TaskId, priority: Priority) -> Result<(), Error> {
        {
            let _g = critical::enter::<P>();
            let task = self.tasks.get(id);
            if task.state.get() == TaskState::Terminated {
                return Err(Error::InvalidParam);
            }
            let old_eff = task.effective_priority.get();
            if !priority.is_higher_than(old_eff) {
                return Ok(());
            }
            task.effective_priority.set(priority);
            if task.state.get() == TaskState::Ready {
                self.ready.remove(&self.tasks, id, old_eff);
                self.ready.push_back(&self.tasks, id);
            }
        }
        self.maybe_preempt();
        Ok(())
    }

    /// Restore a task's effective priority to its base priority (§4.2
    /// "reset_priority"), used by [`crate::mutex`] on unlock.
    pub fn reset_priority(&'static self, id: TaskId) -> Result<(), Error> {
        {
            let _g = critical::enter::<P>();
            let task = self.tasks.get(id);
            if task.state.get() == TaskState::Terminated {
                return Err(Error::InvalidParam);
            }
            let old_eff = task.effective_priority.get();
            let base = task.base_priority.get();
            task.effective_priority.set(base);
            if task.state.get() == TaskState::Ready && old_eff != base {
                self.ready.remove(&self.tasks, id, old_eff);
                self.ready.push_back(&self.tasks, id);
            }
        }
        self.maybe_preempt();
        Ok(())
    }

    /// Park the running task, optionally on a resource's wait queue, with
    /// a deadline `timeout` ticks from now (`0` = forever). Returns once
    /// this task has been rescheduled onto the CPU again, with whichever
    /// outcome woke it. Shared by every blocking synchronization primitive.
    pub(crate) fn block_on(
        &'static self,
        queue: Option<&'static WaitQueue>,
        timeout: Ticks,
    ) -> WaitOutcome {
        let id = self.current.get().expect("kernel not started");
        {
            let _g = critical::enter::<P>();
            let deadline = if timeout == 0 {
                None
            } else {
                Some(self.tick.get() + timeout as u64)
            };
            wait::park(&self.tasks, &self.timeouts, queue, id, deadline);
        }
        self.reschedule();
        self.tasks.get(id).wait_result.get()
    }

    /// Wake the head of `queue` with `outcome`, if any, and enqueue it onto
    /// the ready set. Returns whether a task was woken.
    pub(crate) fn wake_one(&'static self, queue: &'static WaitQueue, outcome: WaitOutcome) -> bool {
        let woke = {
            let _g = critical::enter::<P>();
            match wait::wake_one(&self.tasks, &self.timeouts, queue, outcome) {
                Some(id) => {
                    self.ready.push_back(&self.tasks, id);
                    true
                }
                None => false,
            }
        };
        if woke {
            self.maybe_preempt();
        }
        woke
    }

    /// Wake every task currently parked on `queue` with `outcome`. Returns
    /// the number woken.
    pub(crate) fn wake_all(&'static self, queue: &'static WaitQueue, outcome: WaitOutcome) -> usize {
        let mut count = 0usize;
        loop {
            let woke = {
                let _g = critical::enter::<P>();
                match wait::wake_one(&self.tasks, &self.timeouts, queue, outcome) {
                    Some(id) => {
                        self.ready.push_back(&self.tasks, id);
                        true
                    }
                    None => false,
                }
            };
            if !woke {
                break;
            }
            count += 1;
        }
        if count > 0 {
            self.maybe_preempt();
        }
        count
    }

    /// Wake `id` with `outcome` regardless of which wait structure (if any)
    /// it currently occupies, and enqueue it onto the ready set. Used when
    /// the caller has already determined, by means other than FIFO queue
    /// order, that this specific task should wake — [`crate::event_group`]
    /// (whose wake condition depends on each waiter's own mask) and
    /// [`crate::mutex`] (which hands ownership to a specific popped
    /// waiter).
    pub(crate) fn wake_specific(&'static self, id: TaskId, outcome: WaitOutcome) {
        {
            let _g = critical::enter::<P>();
            wait::unlink_from_all(&self.tasks, &self.timeouts, id);
            self.tasks.get(id).wait_result.set(outcome);
            self.tasks.get(id).state.set(TaskState::Ready);
            self.ready.push_back(&self.tasks, id);
        }
        self.maybe_preempt();
    }

    /// Arm `timer` to next fire `timer`'s period ticks from now (§4.10
    /// "Start (or restart)"). Thin forward to [`TimerList::start`]; the
    /// only thing `Kernel` adds is the current tick count.
    pub fn start_timer(&'static self, timer: &'static Timer) -> Result<(), Error> {
        self.timers.start::<P>(timer, self.tick.get())
    }

    pub fn stop_timer(&'static self, timer: &'static Timer) {
        self.timers.stop::<P>(timer)
    }

    pub fn change_timer_period(&'static self, timer: &'static Timer, period: u32) -> Result<(), Error> {
        self.timers.change_period::<P>(timer, period)
    }

    /// Reset `timer` to fire `timer`'s period ticks from now (§4.10 "Reset").
    pub fn reset_timer(&'static self, timer: &'static Timer) -> Result<(), Error> {
        self.timers.reset::<P>(timer, self.tick.get())
    }

    /// Permanently deactivate `timer` (§4.10 "Delete").
    pub fn delete_timer(&'static self, timer: &'static Timer) {
        self.timers.delete::<P>(timer)
    }

    pub(crate) fn tasks(&self) -> &Pool<TaskCb, N> {
        &self.tasks
    }

    pub(crate) fn timeouts(&self) -> &TimeoutList {
        &self.timeouts
    }

    fn expire_timeouts(&'static self, now: u64) {
        let _g = critical::enter::<P>();
        let tasks = &self.tasks;
        let ready = &self.ready;
        self.timeouts.expire_due(tasks, now, |id| {
            wait::finish_timeout(tasks, id);
            ready.push_back(tasks, id);
        });
    }

    /// If a higher-priority task is ready than the one currently running,
    /// preempt it. Called after anything that can raise the ready set's
    /// best priority or a task's own effective priority: wake, resume,
    /// and every priority-adjustment call.
    fn maybe_preempt(&'static self) {
        self.dispatch(false);
    }

    /// Shared tail of [`Kernel::tick_hook`] and [`Kernel::maybe_preempt`]:
    /// decide whether the running task should give up the CPU, and if so,
    /// mark it `Ready` and hand off to [`Kernel::reschedule`].
    fn dispatch(&'static self, also_on_quantum: bool) {
        let should_switch = {
            let _g = critical::enter::<P>();
            let cur = self.tasks.get(self.current.get().expect("kernel not started"));
            // A caller can reach `dispatch` (via `maybe_preempt`) while the
            // task recorded as `current` has already moved itself to
            // `Blocked` and linked itself onto some other wait queue (e.g.
            // `CondVar::wait`, between its own `wait::park` and the
            // `reschedule` it calls once it's done handing off the mutex
            // it held). Only a `Running` current task is eligible to be
            // re-readied here — anything else is handled by whichever
            // `reschedule` call is already coming.
            if cur.state.get() != TaskState::Running {
                false
            } else {
                let preempted = matches!(
                    self.ready.highest_priority(),
                    Some(p) if p.is_higher_than(cur.effective_priority.get())
                );
                preempted || (also_on_quantum && cur.time_slice.get() == 0)
            }
        };
        if should_switch {
            {
                let _g = critical::enter::<P>();
                let id = self.current.get().expect("kernel not started");
                self.tasks.get(id).state.set(TaskState::Ready);
            }
            self.reschedule();
        }
    }

    /// Pick the next task to run and, if it differs from the one currently
    /// running, switch to it. If the running task is still `Ready` (a
    /// voluntary or policy-driven handoff, as opposed to blocking or
    /// terminating), it is re-enqueued at the tail of its priority slot
    /// with a fresh time slice first — this one rule implements both
    /// round-robin-on-quantum-expiry and plain preemption, since either
    /// way the task most likely to run next is whatever the ready set's
    /// bitmap scan turns up first.
    pub(crate) fn reschedule(&'static self) {
        // Held across `context_switch` itself, not just the bookkeeping
        // above it: the port contract (see `Port::context_switch`) requires
        // the switch to happen with interrupts disabled, since on real
        // hardware it is a handful of inline instructions swapping the
        // stack pointer, and a tick interrupt landing mid-swap would
        // re-enter the scheduler on a half-updated `TaskCb`.
        let _g = critical::enter::<P>();
        let current_id = self.current.get().expect("kernel not started");
        let cur = self.tasks.get(current_id);
        if cur.state.get() == TaskState::Ready {
            cur.time_slice.set(self.quantum);
            self.ready.push_back(&self.tasks, current_id);
        }
        let next_id = self
            .ready
            .pop_front(&self.tasks)
            .expect("ready set is never empty once the idle task exists");
        if next_id == current_id {
            cur.state.set(TaskState::Running);
            return;
        }
        let prev_sp = cur.sp.as_ptr();
        let next_task = self.tasks.get(next_id);
        next_task.state.set(TaskState::Running);
        self.current.set(Some(next_id));
        self.ctx_switches.set(self.ctx_switches.get() + 1);
        // Safety: both pointers were obtained from live `TaskCb`s in this
        // pool, which is never moved or shrunk.
        unsafe { P::context_switch(prev_sp, next_task.sp.as_ptr()) };
        // `_g` drops here, once `prev` (this task) has been switched back
        // in — not where it was acquired.
    }
}
