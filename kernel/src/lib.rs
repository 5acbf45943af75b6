//! A small preemptive-priority RTOS kernel core.
//!
//! This crate implements the scheduler, task lifecycle, and the
//! synchronization/timing/memory substrate that sits underneath it: mutexes
//! with priority inheritance, counting semaphores, condition variables,
//! event groups, message queues, software timers, a fixed-pool block
//! allocator, critical-section discipline, and an MPU configuration
//! interface. Wire protocols, file systems, and OTA update logic are
//! out of scope and are expected to be built as ordinary clients of these
//! primitives.
//!
//! The kernel is generic over a [`port::Port`] implementation that supplies
//! the architecture-specific pieces (context switch, critical section,
//! tick source, optional MPU programming). A hosted port can run the kernel
//! on real OS threads for testing; a bare-metal port implements the same
//! trait against real hardware.
#![cfg_attr(not(test), no_std)] // link `std` only for `cfg(test)`, where the quickcheck property tests need it
#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
pub mod condvar;
pub mod critical;
pub mod error;
pub mod event_group;
pub mod mpu;
pub mod mutex;
pub mod pool;
pub mod port;
pub mod priority;
pub mod queue;
pub mod readyqueue;
pub mod sched;
pub mod semaphore;
pub mod stats;
pub mod task;
pub mod timer;
mod trace;
pub mod wait;

pub use error::Error;
pub use priority::Priority;
pub use sched::{Kernel, Ticks};
pub use task::{TaskId, TaskState};

/// Result type used throughout the kernel: every fallible operation returns
/// this instead of panicking or unwinding.
pub type Result<T> = core::result::Result<T, Error>;
