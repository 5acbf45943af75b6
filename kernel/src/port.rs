//! The platform port contract (§6).
//!
//! Everything architecture-specific — the context switch, the critical
//! section primitive, the tick interrupt source, and (optionally) MPU
//! programming — is isolated behind this trait. The kernel is generic over
//! `Port` and is otherwise free of inline assembly or target-specific code.

bitflags::bitflags! {
    /// Access permissions for an MPU region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessBits: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

/// Platform contract required by the kernel. Implemented once per target
/// (or, for testing, by a hosted simulation backed by OS threads).
///
/// # Safety
///
/// Implementations must uphold:
/// - `critical_enter`/`critical_exit` actually disable/restore the global
///   interrupt-enable state; the kernel relies on this for every mutation
///   of scheduler structures to be atomic with respect to interrupt
///   handlers and other tasks.
/// - `context_switch` must not return into `prev`'s caller until `prev` is
///   scheduled again; it must deliver control into `next` using the stack
///   pointer most recently recorded for it (either by a prior
///   `context_switch` or by `initial_stack_frame`).
pub unsafe trait Port {
    /// Opaque token returned by [`Port::critical_enter`] and consumed by
    /// [`Port::critical_exit`]. Treated as opaque by the kernel; mismatched
    /// enter/exit pairs are a contract violation.
    type CriticalToken: Copy;

    /// Disable interrupts globally, returning a token that records the
    /// previous interrupt-enable state. Nesting is supported: a nested
    /// `critical_enter` records "interrupts were already disabled" and its
    /// matching `critical_exit` is then a no-op.
    fn critical_enter() -> Self::CriticalToken;

    /// Restore the interrupt-enable state recorded by `token`.
    ///
    /// # Safety
    /// `token` must be the most recently obtained, not-yet-consumed token
    /// from `critical_enter` on this core (nesting must unwind in LIFO
    /// order).
    unsafe fn critical_exit(token: Self::CriticalToken);

    /// Configure a periodic interrupt that calls [`crate::sched::Kernel::tick_hook`]
    /// at `rate_hz`. Called once during kernel startup.
    fn tick_source_init(rate_hz: u32);

    /// Architecture-specific register save/restore. Saves the
    /// caller-preserved registers onto the stack pointed to by `prev_sp`,
    /// records the resulting stack pointer back into `*prev_sp`, then loads
    /// `next_sp` and resumes execution there.
    ///
    /// # Safety
    /// `prev_sp` and `next_sp` must each point at a valid, live stack
    /// pointer slot belonging to a task created by this port (either newly
    /// synthesized by [`Port::initial_stack_frame`] or previously saved by
    /// this same function). Must be called with interrupts disabled; the
    /// port is responsible for the interrupt-enable state of the resumed
    /// task.
    unsafe fn context_switch(prev_sp: *mut *mut u8, next_sp: *mut *mut u8);

    /// Synthesize an initial stack frame in `stack` so that the first
    /// `context_switch` into it delivers control to `entry(arg)` as if
    /// returning from an interrupt.
    fn initial_stack_frame(stack: &mut [u8], entry: fn(usize), arg: usize) -> *mut u8;

    /// Program MPU region `region_id` (`< 8`). `base` must be aligned to
    /// `max(32, size)`; `size` must be a power of two `>= 32`. Returns
    /// `false` if the platform has no MPU (the caller treats this as a
    /// documented no-op, not an error, so ports without an MPU need not
    /// implement region checking at all).
    fn mpu_write_region(region_id: u8, base: usize, size: usize, access: AccessBits) -> bool {
        let _ = (region_id, base, size, access);
        false
    }

    /// Enable or disable MPU enforcement globally. No-op on platforms
    /// without an MPU.
    fn mpu_enable(enabled: bool) {
        let _ = enabled;
    }

    /// Enter the lowest-power wait state compatible with an empty run
    /// queue (e.g. `wfi` on Cortex-M). Called from the idle task. The
    /// default implementation spins, which is always correct but never
    /// saves power.
    fn idle_wait_for_interrupt() {}
}
