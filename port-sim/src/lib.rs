//! Hosted [`Port`] backed by real OS threads, for exercising scheduling
//! decisions under `std` instead of on a target board.
//!
//! One OS thread is spawned per task, and a "run token" — a condvar-gated
//! bool kept alongside each thread — ensures only the task the kernel's own
//! scheduler chose is ever allowed to proceed. [`Port::context_switch`] does
//! not move any registers: it wakes the target thread's token and then
//! blocks its caller's own thread on its own token, exactly mirroring what a
//! real context switch accomplishes (control leaves `prev` and does not
//! return until `prev` is switched back in) without needing any real
//! register save/restore. This buys correctness of scheduling order at the
//! cost of real preemption timing, which is the trade this port is for:
//! scenario tests drive the clock themselves via `Kernel::tick_hook`, they
//! don't rely on a real periodic interrupt.
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};

use micrort_kernel::port::{AccessBits, Port};

/// Upper bound on tasks a single process hosting this port can create.
/// Unlike the kernel's own `Pool<T, N>`, this isn't a type parameter: `Port`
/// is implemented once for the unit type `SimPort`, with no capacity of its
/// own to parameterize, so a generous fixed ceiling stands in for it.
const MAX_SIM_TASKS: usize = 64;

struct ThreadSlot {
    run: Mutex<bool>,
    cond: Condvar,
}

impl ThreadSlot {
    const fn new() -> Self {
        ThreadSlot {
            run: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

fn slots() -> &'static [ThreadSlot; MAX_SIM_TASKS] {
    static SLOTS: OnceLock<[ThreadSlot; MAX_SIM_TASKS]> = OnceLock::new();
    SLOTS.get_or_init(|| core::array::from_fn(|_| ThreadSlot::new()))
}

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

/// Set this slot's run token and wake whoever is parked on it.
fn wake(slot: &ThreadSlot) {
    let mut run = slot.run.lock().unwrap();
    *run = true;
    slot.cond.notify_one();
}

/// Block the calling thread until its own run token is set, then consume it.
fn park_until_resumed(slot: &ThreadSlot) {
    let mut run = slot.run.lock().unwrap();
    while !*run {
        run = slot.cond.wait(run).unwrap();
    }
    *run = false;
}

/// Block forever. Used both by a task whose entry function returns (not a
/// contract this port needs to give any other meaning to) and by the thread
/// that calls [`Kernel::start`], which per its own contract never resumes.
fn park_forever() -> ! {
    let lock = Mutex::new(());
    let cond = Condvar::new();
    let mut guard = lock.lock().unwrap();
    loop {
        guard = cond.wait(guard).unwrap();
    }
}

// The CPU-lock simulation: a single process-wide spin lock, held for the
// duration of a top-level `critical_enter`/`critical_exit` pair. Nested
// calls on the same thread don't re-lock (that would deadlock `spin::Mutex`,
// which isn't reentrant) — a thread-local depth counter makes only the
// outermost enter/exit pair touch the real lock, matching the nesting
// contract every other `Port` implementation in this crate honors.
static CPU_LOCK: spin::Mutex<()> = spin::Mutex::new(());

thread_local! {
    static CPU_LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
    static CPU_LOCK_GUARD: Cell<Option<spin::MutexGuard<'static, ()>>> = const { Cell::new(None) };
}

/// Hosted platform port: tasks run as OS threads, gated by condvars so that
/// only the kernel's chosen task is ever actually executing.
pub struct SimPort;

unsafe impl Port for SimPort {
    type CriticalToken = ();

    fn critical_enter() -> Self::CriticalToken {
        CPU_LOCK_DEPTH.with(|depth| {
            let d = depth.get();
            if d == 0 {
                let guard = CPU_LOCK.lock();
                CPU_LOCK_GUARD.with(|g| g.set(Some(guard)));
            }
            depth.set(d + 1);
        });
    }

    unsafe fn critical_exit(_: Self::CriticalToken) {
        CPU_LOCK_DEPTH.with(|depth| {
            let d = depth.get();
            debug_assert!(d > 0, "critical_exit without a matching critical_enter");
            depth.set(d - 1);
            if d == 1 {
                CPU_LOCK_GUARD.with(|g| {
                    g.take();
                });
            }
        });
    }

    /// No real interrupt source is installed: scenario tests call
    /// [`micrort_kernel::sched::Kernel::tick_hook`] directly to advance the
    /// simulated clock on their own schedule, which is what this port is
    /// for (deterministic scheduling decisions, not wall-clock timing).
    fn tick_source_init(_rate_hz: u32) {}

    unsafe fn context_switch(prev_sp: *mut *mut u8, next_sp: *mut *mut u8) {
        // The kernel calls this holding a critical section and expects it
        // to still be held on return — real single-core ports keep
        // interrupts disabled across the handful of instructions that swap
        // the stack pointer. Here, though, "the switch" is a real OS-level
        // block of indefinite length, and the woken task (or anything else)
        // needs to be able to take its own critical section while we're
        // parked. So drop the simulated lock before blocking and reacquire
        // it before returning: the kernel never observes the gap, only
        // that the lock was held throughout, same as a hardware port.
        CPU_LOCK_GUARD.with(|g| {
            g.take();
        });

        // Safety: both slots point at either the pointer `initial_stack_frame`
        // returned or one this function previously wrote back, per the
        // trait's contract; both denote live entries in `slots()`.
        let next_ptr = unsafe { *next_sp } as *const ThreadSlot;
        wake(unsafe { &*next_ptr });

        let prev_ptr = unsafe { *prev_sp };
        if prev_ptr.is_null() {
            // Called from `Kernel::start`: there is no task thread to
            // suspend, only the thread that called `start` itself, which by
            // contract never resumes either.
            park_forever();
        }
        let prev_ptr = prev_ptr as *const ThreadSlot;
        park_until_resumed(unsafe { &*prev_ptr });

        let guard = CPU_LOCK.lock();
        CPU_LOCK_GUARD.with(|g| g.set(Some(guard)));
    }

    fn initial_stack_frame(stack: &mut [u8], entry: fn(usize), arg: usize) -> *mut u8 {
        let idx = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        assert!(
            idx < MAX_SIM_TASKS,
            "port-sim: exceeded MAX_SIM_TASKS ({MAX_SIM_TASKS})"
        );
        let slot: &'static ThreadSlot = &slots()[idx];
        let slot_addr = slot as *const ThreadSlot as usize;

        // The byte count is only a hint here, not a real stack-pointer
        // budget: OS threads carry their own stack, so a floor keeps tiny
        // embedded-sized stacks (a few hundred bytes) from starving it.
        let stack_size = stack.len().max(256 * 1024);
        std::thread::Builder::new()
            .name(format!("micrort-task-{idx}"))
            .stack_size(stack_size)
            .spawn(move || {
                let slot = unsafe { &*(slot_addr as *const ThreadSlot) };
                park_until_resumed(slot);
                entry(arg);
                park_forever();
            })
            .expect("port-sim: failed to spawn task thread");

        slot_addr as *mut u8
    }

    fn mpu_write_region(_region_id: u8, _base: usize, _size: usize, _access: AccessBits) -> bool {
        false
    }

    fn idle_wait_for_interrupt() {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micrort_kernel::priority::Priority;
    use micrort_kernel::sched::Kernel;
    use std::sync::atomic::AtomicU32;

    static ORDER: AtomicU32 = AtomicU32::new(0);
    static LOW_SEEN: AtomicUsize = AtomicUsize::new(0);
    static HIGH_SEEN: AtomicUsize = AtomicUsize::new(0);

    fn high_task(_: usize) {
        HIGH_SEEN.store(ORDER.fetch_add(1, Ordering::SeqCst) as usize + 1, Ordering::SeqCst);
        park_forever();
    }

    fn low_task(_: usize) {
        LOW_SEEN.store(ORDER.fetch_add(1, Ordering::SeqCst) as usize + 1, Ordering::SeqCst);
        park_forever();
    }

    /// The higher-priority task must be the one the kernel switches into
    /// first, proving the condvar baton actually follows the scheduler's
    /// choice rather than OS thread-spawn order.
    #[test]
    fn higher_priority_task_runs_first() {
        let _ = env_logger::try_init();

        static KERNEL: Kernel<4, SimPort> = Kernel::new(10);
        static mut LOW_STACK: [u8; 4096] = [0; 4096];
        static mut HIGH_STACK: [u8; 4096] = [0; 4096];
        ORDER.store(0, Ordering::SeqCst);
        LOW_SEEN.store(0, Ordering::SeqCst);
        HIGH_SEEN.store(0, Ordering::SeqCst);

        // Safety: each `static mut` is touched only by this single test.
        let low_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(LOW_STACK) };
        let high_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(HIGH_STACK) };

        KERNEL
            .create_task("low", low_task, 0, Priority::new(5), low_stack)
            .unwrap();
        KERNEL
            .create_task("high", high_task, 0, Priority::new(1), high_stack)
            .unwrap();

        std::thread::spawn(move || {
            KERNEL.start(1000);
        });

        // Give both task threads a moment to actually reach their body.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(HIGH_SEEN.load(Ordering::SeqCst), 1);
    }
}
