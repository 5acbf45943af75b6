//! End-to-end scheduling scenarios, run on real OS threads via
//! `micrort-port-sim` instead of target hardware.
//!
//! Every scenario creates an `IDLE`-priority task that loops calling
//! `Kernel::tick_hook` and yielding: besides giving the scenarios that need
//! real elapsed ticks (software timers, delay) a legitimate tick source
//! (driven from its own thread, the same way a real tick ISR runs on
//! whichever task it interrupts), it also guarantees the ready set is
//! never empty once every other task in a scenario has terminated, which
//! `Kernel::reschedule` requires.
//!
//! Orchestration happens almost entirely through flags and mutex-guarded
//! logs the tasks themselves poll and write from their own threads; the
//! test thread only calls kernel methods that never reschedule
//! (`create_task`, read-only queries), since anything that might call
//! `Port::context_switch` must run on the OS thread standing in for the
//! task being switched away from.
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use micrort_kernel::condvar::CondVar;
use micrort_kernel::event_group::{EventGroup, WaitMode};
use micrort_kernel::mutex::Mutex;
use micrort_kernel::priority::Priority;
use micrort_kernel::queue::Queue;
use micrort_kernel::sched::Kernel;
use micrort_kernel::timer::{Timer, TimerMode};
use micrort_port_sim::SimPort;

const IDLE_STACK_SIZE: usize = 4096;
const TASK_STACK_SIZE: usize = 4096;

fn idle_task(_: usize) {
    loop {
        std::thread::yield_now();
    }
}

/// Polls `cond` until it's true or `timeout` elapses, returning whether it
/// was observed true. Every scenario below only ever waits on conditions
/// that are guaranteed to eventually hold; the timeout exists purely so a
/// genuine regression fails the test instead of hanging the suite.
fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------
// 1. Priority-inversion avoidance (classic L/M/H problem).
// ---------------------------------------------------------------------
mod priority_inversion {
    use super::*;

    static KERNEL: Kernel<8, SimPort> = Kernel::new(10);
    static MUTEX_X: Mutex = Mutex::new();
    static EVENTS: StdMutex<Vec<&'static str>> = StdMutex::new(Vec::new());
    static PRIO_LOG: StdMutex<Vec<u8>> = StdMutex::new(Vec::new());

    fn log(event: &'static str) {
        EVENTS.lock().unwrap().push(event);
    }

    fn logged(event: &str) -> bool {
        EVENTS.lock().unwrap().iter().any(|e| *e == event)
    }

    fn index_of(event: &str) -> usize {
        EVENTS.lock().unwrap().iter().position(|e| *e == event).unwrap()
    }

    // Priority::new(192): lowest of the three, locks the mutex first.
    fn l_task(_: usize) {
        MUTEX_X.lock(&KERNEL).unwrap();
        log("L_locked");
        loop {
            let p = KERNEL.task(KERNEL.current_task()).effective_priority();
            PRIO_LOG.lock().unwrap().push(p.get());
            if p == Priority::new(64) {
                break;
            }
            KERNEL.yield_now();
        }
        log("L_unlocking");
        MUTEX_X.unlock(&KERNEL).unwrap();
        log("L_unlocked");
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    // Priority::new(128): unrelated to the mutex, just soaks up the CPU
    // for a few quanta to demonstrate the inversion risk before standing
    // down.
    fn m_task(_: usize) {
        log("M_running");
        for _ in 0..3 {
            KERNEL.yield_now();
        }
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    // Priority::new(64): highest; contends for the mutex L holds.
    fn h_task(_: usize) {
        log("H_attempting");
        MUTEX_X.lock(&KERNEL).unwrap();
        log("H_locked");
        MUTEX_X.unlock(&KERNEL).unwrap();
        log("H_done");
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    #[test]
    fn boosts_owner_then_restores_on_unlock() {
        static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
        static mut L_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        static mut M_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        static mut H_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];

        let idle_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
        let l_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(L_STACK) };
        let m_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(M_STACK) };
        let h_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(H_STACK) };

        KERNEL.create_task("idle", idle_task, 0, Priority::IDLE, idle_stack).unwrap();
        let l_id = KERNEL
            .create_task("l", l_task, 0, Priority::new(192), l_stack)
            .unwrap();
        std::thread::spawn(move || KERNEL.start(1000));

        assert!(wait_for(DEFAULT_TIMEOUT, || logged("L_locked")));

        KERNEL.create_task("m", m_task, 0, Priority::new(128), m_stack).unwrap();
        assert!(wait_for(DEFAULT_TIMEOUT, || logged("M_running")));

        KERNEL.create_task("h", h_task, 0, Priority::new(64), h_stack).unwrap();
        assert!(wait_for(DEFAULT_TIMEOUT, || logged("H_done")));

        assert!(PRIO_LOG.lock().unwrap().contains(&64), "L was never boosted");
        assert_eq!(KERNEL.task(l_id).base_priority(), Priority::new(192));
        assert_eq!(KERNEL.task(l_id).effective_priority(), Priority::new(192));

        assert!(index_of("L_locked") < index_of("M_running"));
        assert!(index_of("M_running") < index_of("H_attempting"));
        assert!(index_of("L_unlocking") < index_of("H_locked"));
        assert!(index_of("H_locked") < index_of("H_done"));
    }
}

// ---------------------------------------------------------------------
// 2. Producer-consumer over a bounded queue.
// ---------------------------------------------------------------------
mod producer_consumer {
    use super::*;

    const ITEMS_PER_PRODUCER: u32 = 100;

    static KERNEL: Kernel<8, SimPort> = Kernel::new(10);
    static QUEUE: Queue<u32, 5> = Queue::new();
    static RESULT: StdMutex<Option<Vec<u32>>> = StdMutex::new(None);

    fn producer(id: usize) {
        for i in 0..ITEMS_PER_PRODUCER {
            let item = (id as u32) * 10_000 + i;
            QUEUE.send(&KERNEL, item, 0).unwrap();
        }
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    fn consumer(_: usize) {
        let total = 2 * ITEMS_PER_PRODUCER;
        let mut items = Vec::with_capacity(total as usize);
        for _ in 0..total {
            items.push(QUEUE.receive(&KERNEL, 0).unwrap());
        }
        *RESULT.lock().unwrap() = Some(items);
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    #[test]
    fn exactly_all_items_received_without_duplication() {
        static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
        static mut P0_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        static mut P1_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        static mut C_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];

        let idle_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
        let p0_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(P0_STACK) };
        let p1_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(P1_STACK) };
        let c_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(C_STACK) };

        KERNEL.create_task("idle", idle_task, 0, Priority::IDLE, idle_stack).unwrap();
        KERNEL
            .create_task("producer-0", producer, 0, Priority::new(128), p0_stack)
            .unwrap();
        KERNEL
            .create_task("producer-1", producer, 1, Priority::new(128), p1_stack)
            .unwrap();
        KERNEL
            .create_task("consumer", consumer, 0, Priority::new(128), c_stack)
            .unwrap();

        std::thread::spawn(move || KERNEL.start(1000));

        assert!(wait_for(DEFAULT_TIMEOUT, || RESULT.lock().unwrap().is_some()));

        let items = RESULT.lock().unwrap().take().unwrap();
        assert_eq!(items.len(), 2 * ITEMS_PER_PRODUCER as usize);
        let unique: std::collections::HashSet<u32> = items.iter().copied().collect();
        assert_eq!(unique.len(), items.len(), "queue delivered a duplicate");
    }
}

// ---------------------------------------------------------------------
// 3. Condition variable correctness.
// ---------------------------------------------------------------------
mod condvar_correctness {
    use super::*;

    const ITEMS: u32 = 10;
    const CONSUMERS: usize = 3;

    static KERNEL: Kernel<8, SimPort> = Kernel::new(10);
    static GUARD: Mutex = Mutex::new();
    static NOT_EMPTY: CondVar = CondVar::new();
    static COUNT: StdMutex<u32> = StdMutex::new(0);
    static DONE: AtomicBool = AtomicBool::new(false);
    static TOTAL_RECEIVED: AtomicU32 = AtomicU32::new(0);
    static TASKS_DONE: AtomicUsize = AtomicUsize::new(0);

    fn producer(_: usize) {
        for i in 0..ITEMS {
            GUARD.lock(&KERNEL).unwrap();
            *COUNT.lock().unwrap() += 1;
            GUARD.unlock(&KERNEL).unwrap();
            if i + 1 == ITEMS {
                DONE.store(true, Ordering::Release);
                NOT_EMPTY.broadcast(&KERNEL);
            } else {
                NOT_EMPTY.signal(&KERNEL);
            }
        }
        TASKS_DONE.fetch_add(1, Ordering::AcqRel);
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    fn consumer(_: usize) {
        let mut received = 0u32;
        loop {
            GUARD.lock(&KERNEL).unwrap();
            while *COUNT.lock().unwrap() == 0 {
                if DONE.load(Ordering::Acquire) {
                    break;
                }
                NOT_EMPTY.wait(&KERNEL, &GUARD, 0).unwrap();
            }
            let mut count = COUNT.lock().unwrap();
            if *count == 0 {
                drop(count);
                GUARD.unlock(&KERNEL).unwrap();
                break;
            }
            *count -= 1;
            drop(count);
            received += 1;
            GUARD.unlock(&KERNEL).unwrap();
        }
        TOTAL_RECEIVED.fetch_add(received, Ordering::AcqRel);
        TASKS_DONE.fetch_add(1, Ordering::AcqRel);
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    #[test]
    fn broadcast_wakes_every_waiter_with_exactly_ten_receives() {
        static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
        static mut P_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        static mut C_STACKS: [[u8; TASK_STACK_SIZE]; CONSUMERS] = [[0; TASK_STACK_SIZE]; CONSUMERS];

        let idle_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
        let p_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(P_STACK) };

        KERNEL.create_task("idle", idle_task, 0, Priority::IDLE, idle_stack).unwrap();
        KERNEL
            .create_task("producer", producer, 0, Priority::new(128), p_stack)
            .unwrap();
        for i in 0..CONSUMERS {
            // Safety: each element is handed to exactly one `create_task` call.
            let stack: &'static mut [u8] =
                unsafe { &mut *core::ptr::addr_of_mut!(C_STACKS[i]) };
            KERNEL
                .create_task("consumer", consumer, 0, Priority::new(128), stack)
                .unwrap();
        }

        std::thread::spawn(move || KERNEL.start(1000));

        assert!(wait_for(DEFAULT_TIMEOUT, || {
            TASKS_DONE.load(Ordering::Acquire) == CONSUMERS + 1
        }));
        assert_eq!(TOTAL_RECEIVED.load(Ordering::Acquire), ITEMS);
        assert_eq!(*COUNT.lock().unwrap(), 0);
    }
}

// ---------------------------------------------------------------------
// 4. Software timer cadence.
// ---------------------------------------------------------------------
mod timer_cadence {
    use super::*;

    const TICKS_TO_RUN: u64 = 1050;

    static KERNEL: Kernel<4, SimPort> = Kernel::new(10);
    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);
    static RUN_DONE: AtomicBool = AtomicBool::new(false);

    fn on_fire(_: usize) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    static RELOAD: Timer = Timer::new(TimerMode::AutoReload, 100, on_fire, 0);

    // Stands in for the periodic tick ISR, driving exactly `TICKS_TO_RUN`
    // ticks and then handing the CPU to nothing in particular — this
    // scenario has no other task, so nobody observes it stop.
    fn ticker(_: usize) {
        KERNEL.start_timer(&RELOAD).unwrap();
        for _ in 0..TICKS_TO_RUN {
            KERNEL.tick_hook();
        }
        RUN_DONE.store(true, Ordering::Release);
        loop {
            std::thread::yield_now();
        }
    }

    #[test]
    fn auto_reload_fires_exactly_ten_times_in_1050_ticks() {
        static mut TICKER_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        let ticker_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(TICKER_STACK) };

        KERNEL
            .create_task("ticker", ticker, 0, Priority::NORMAL, ticker_stack)
            .unwrap();
        std::thread::spawn(move || KERNEL.start(1000));

        assert!(wait_for(DEFAULT_TIMEOUT, || RUN_DONE.load(Ordering::Acquire)));
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 10);
        assert_eq!(KERNEL.tick_count(), TICKS_TO_RUN);
    }
}

// ---------------------------------------------------------------------
// 5. Delay precision.
// ---------------------------------------------------------------------
mod delay_precision {
    use super::*;

    const DELAY_TICKS: u32 = 500;

    static KERNEL: Kernel<4, SimPort> = Kernel::new(10);
    static WAKE_TICK: StdMutex<Option<u64>> = StdMutex::new(None);
    static START_TICK: StdMutex<Option<u64>> = StdMutex::new(None);

    fn idle_ticker(_: usize) {
        loop {
            KERNEL.tick_hook();
        }
    }

    fn sleeper(_: usize) {
        *START_TICK.lock().unwrap() = Some(KERNEL.tick_count());
        KERNEL.delay(DELAY_TICKS).unwrap();
        *WAKE_TICK.lock().unwrap() = Some(KERNEL.tick_count());
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    #[test]
    fn wakes_within_one_quantum_of_the_requested_delay() {
        static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
        static mut SLEEPER_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];

        let idle_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
        let sleeper_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(SLEEPER_STACK) };

        // `sleeper` outranks the idle ticker so it is the one chosen first;
        // once it blocks in `delay`, the idle ticker is the only ready task
        // and drives the clock forward until the deadline expires.
        KERNEL
            .create_task("idle", idle_ticker, 0, Priority::IDLE, idle_stack)
            .unwrap();
        KERNEL
            .create_task("sleeper", sleeper, 0, Priority::NORMAL, sleeper_stack)
            .unwrap();

        std::thread::spawn(move || KERNEL.start(1000));

        assert!(wait_for(DEFAULT_TIMEOUT, || WAKE_TICK.lock().unwrap().is_some()));

        let start = START_TICK.lock().unwrap().unwrap();
        let wake = WAKE_TICK.lock().unwrap().unwrap();
        let quantum = KERNEL.quantum() as u64;
        assert!(wake >= start + DELAY_TICKS as u64);
        assert!(wake < start + DELAY_TICKS as u64 + quantum.max(1));
    }
}

// ---------------------------------------------------------------------
// 6. Event group ALL semantics.
// ---------------------------------------------------------------------
mod event_group_all {
    use super::*;

    static KERNEL: Kernel<4, SimPort> = Kernel::new(10);
    static EVENTS: EventGroup = EventGroup::new(0);
    static WAKE_COUNT: AtomicU32 = AtomicU32::new(0);
    static RECEIVED: StdMutex<Option<u32>> = StdMutex::new(None);
    static BITS_SET: AtomicUsize = AtomicUsize::new(0);

    fn waiter(_: usize) {
        let received = EVENTS.wait_bits(&KERNEL, 0b111, WaitMode::All, true, 0).unwrap();
        WAKE_COUNT.fetch_add(1, Ordering::AcqRel);
        *RECEIVED.lock().unwrap() = Some(received);
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    fn producer(_: usize) {
        for bit in [1u32, 2, 4] {
            // A small yield between sets gives the waiter a chance to
            // observe (and reject) each partial state before the mask is
            // fully satisfied, rather than happening to only ever run
            // after the third `set_bits`.
            KERNEL.yield_now();
            EVENTS.set_bits(&KERNEL, bit);
            BITS_SET.fetch_add(1, Ordering::AcqRel);
        }
        KERNEL.delete(KERNEL.current_task()).ok();
    }

    #[test]
    fn waiter_wakes_once_with_all_three_bits_and_clears_on_exit() {
        static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
        static mut WAITER_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
        static mut PRODUCER_STACK: [u8; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];

        let idle_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
        let waiter_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(WAITER_STACK) };
        let producer_stack: &'static mut [u8] =
            unsafe { &mut *core::ptr::addr_of_mut!(PRODUCER_STACK) };

        KERNEL.create_task("idle", idle_task, 0, Priority::IDLE, idle_stack).unwrap();
        KERNEL
            .create_task("waiter", waiter, 0, Priority::new(128), waiter_stack)
            .unwrap();
        KERNEL
            .create_task("producer", producer, 0, Priority::new(128), producer_stack)
            .unwrap();

        std::thread::spawn(move || KERNEL.start(1000));

        assert!(wait_for(DEFAULT_TIMEOUT, || RECEIVED.lock().unwrap().is_some()));

        assert_eq!(BITS_SET.load(Ordering::Acquire), 3);
        assert_eq!(WAKE_COUNT.load(Ordering::Acquire), 1);
        assert_eq!(RECEIVED.lock().unwrap().unwrap(), 0b111);
        assert_eq!(EVENTS.get_bits(), 0);
    }
}
