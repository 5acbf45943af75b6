//! Two-task demo: a high-priority "blink" task and a lower-priority
//! "worker" task sharing a counter behind a mutex, on real Cortex-M
//! hardware.
#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use micrort_kernel::mutex::Mutex;
use micrort_kernel::priority::Priority;
use micrort_kernel::sched::Kernel;
use micrort_port_cortex_m::{register_tick_hook, CortexMPort};

const NUM_TASKS: usize = 4;

static KERNEL: Kernel<NUM_TASKS, CortexMPort> = Kernel::new(10);
static COUNTER_LOCK: Mutex = Mutex::new();
static mut COUNTER: u32 = 0;

static mut BLINK_STACK: [u8; 1024] = [0; 1024];
static mut WORKER_STACK: [u8; 1024] = [0; 1024];

/// Bumps the shared counter every half second. Runs at [`Priority::HIGH`]
/// so it preempts `worker_task` the moment it becomes ready.
fn blink_task(_: usize) {
    loop {
        COUNTER_LOCK.lock(&KERNEL).unwrap();
        // Safety: only ever touched while `COUNTER_LOCK` is held.
        unsafe { COUNTER = COUNTER.wrapping_add(1) };
        COUNTER_LOCK.unlock(&KERNEL).unwrap();
        KERNEL.delay(500).ok();
    }
}

/// Reads the counter every 50 ticks. Runs at [`Priority::NORMAL`], well
/// below `blink_task`, so contention on `COUNTER_LOCK` exercises priority
/// inheritance when `blink_task` becomes ready while this task holds it.
fn worker_task(_: usize) {
    loop {
        COUNTER_LOCK.lock(&KERNEL).unwrap();
        let _snapshot = unsafe { COUNTER };
        COUNTER_LOCK.unlock(&KERNEL).unwrap();
        KERNEL.delay(50).ok();
    }
}

fn tick() {
    KERNEL.tick_hook();
}

#[entry]
fn main() -> ! {
    // Safety: these statics are touched only here, before either task
    // starts running, and never again from `main`.
    let blink_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(BLINK_STACK) };
    let worker_stack: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(WORKER_STACK) };

    KERNEL
        .create_task("blink", blink_task, 0, Priority::HIGH, blink_stack)
        .unwrap();
    KERNEL
        .create_task("worker", worker_task, 0, Priority::NORMAL, worker_stack)
        .unwrap();

    register_tick_hook(tick);
    KERNEL.start(1000);
}
