//! Real Cortex-M [`Port`] implementation: PRIMASK-based critical sections
//! (via the `critical-section` crate's single-core Cortex-M backend),
//! SysTick as the tick source, and a minimal register-only context switch
//! performed by an ordinary (non-exception) naked routine.
//!
//! This deliberately does *not* defer the switch to a `PendSV` exception the
//! way a interrupt-priority-aware kernel normally would: [`Port::context_switch`]
//! is specified as a synchronous call that only returns once the calling
//! task is resumed, so the switch happens inline, at the call site, under
//! the critical section the caller already holds. The routine therefore
//! only needs to save/restore the callee-saved registers (`r4`-`r11`) plus
//! `r0`/`lr`, not a full exception stack frame — there is no hardware
//! auto-stacking to account for because no exception entry is involved.
#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

use core::sync::atomic::{AtomicPtr, Ordering};

use cortex_m_rt::exception;
use micrort_kernel::port::{AccessBits, Port};

mod mpu;

core::arch::global_asm!(
    ".thumb_func",
    ".global micrort_context_switch",
    "micrort_context_switch:",
    "    push {{r0, r4-r11, lr}}",
    "    mov  r2, sp",
    "    str  r2, [r0]",
    "    ldr  r2, [r1]",
    "    mov  sp, r2",
    "    pop  {{r0, r4-r11, lr}}",
    "    bx   lr",
);

unsafe extern "C" {
    fn micrort_context_switch(prev_sp: *mut *mut u8, next_sp: *mut *mut u8);
}

/// Number of words in the frame [`CortexMPort::initial_stack_frame`] builds
/// and `micrort_context_switch`'s `push {r0, r4-r11, lr}` saves/restores.
const FRAME_WORDS: usize = 10;

/// Type-erased hook called from the `SysTick` exception. The port crate
/// can't name a concrete `Kernel<N, P>` (`N` is chosen by the application),
/// so the application registers its own tick function — typically a
/// zero-capture `fn()` closing over its `'static KERNEL` — via
/// [`register_tick_hook`] before calling `Kernel::start`.
static TICK_HOOK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Register the function the `SysTick` exception calls on every tick.
/// Must be called before `Kernel::start`, which itself calls
/// [`Port::tick_source_init`] and arms the timer.
pub fn register_tick_hook(f: fn()) {
    TICK_HOOK.store(f as *mut (), Ordering::Release);
}

#[exception]
fn SysTick() {
    let ptr = TICK_HOOK.load(Ordering::Acquire);
    if !ptr.is_null() {
        // Safety: only ever stored by `register_tick_hook` from a real `fn()`.
        let f: fn() = unsafe { core::mem::transmute::<*mut (), fn()>(ptr) };
        f();
    }
}

/// Cortex-M core clock, in Hz. SysTick's reload value is derived from this
/// and the requested tick rate; override for boards clocked differently
/// than the default assumption below.
pub const CORE_CLOCK_HZ: u32 = 16_000_000;

const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;

/// Platform port for real Cortex-M targets.
pub struct CortexMPort;

unsafe impl Port for CortexMPort {
    type CriticalToken = critical_section::RawRestoreState;

    fn critical_enter() -> Self::CriticalToken {
        // Safety: paired with `critical_exit` below, which consumes exactly
        // the token this call returns, per `critical_section`'s contract.
        unsafe { critical_section::acquire() }
    }

    unsafe fn critical_exit(token: Self::CriticalToken) {
        // Safety: caller guarantees LIFO pairing with the matching `acquire`.
        unsafe { critical_section::release(token) };
    }

    fn tick_source_init(rate_hz: u32) {
        let reload = (CORE_CLOCK_HZ / rate_hz).saturating_sub(1);
        // Safety: SysTick is a core peripheral with a fixed address on every
        // Armv6/7/8-M implementation; this runs once during startup before
        // any task can race it.
        unsafe {
            core::ptr::write_volatile(SYST_RVR, reload);
            core::ptr::write_volatile(SYST_CVR, 0);
            // CLKSOURCE (processor clock) | TICKINT (interrupt on count-to-0) | ENABLE
            core::ptr::write_volatile(SYST_CSR, 0b111);
        }
    }

    unsafe fn context_switch(prev_sp: *mut *mut u8, next_sp: *mut *mut u8) {
        // Safety: both slots hold stack pointers synthesized by
        // `initial_stack_frame` or previously saved by this same function,
        // per the trait's contract; called with interrupts disabled.
        unsafe { micrort_context_switch(prev_sp, next_sp) };
    }

    fn initial_stack_frame(stack: &mut [u8], entry: fn(usize), arg: usize) -> *mut u8 {
        assert!(
            stack.len() >= FRAME_WORDS * core::mem::size_of::<usize>(),
            "stack too small to hold an initial task frame"
        );
        let top = (stack.as_mut_ptr() as usize + stack.len()) & !0b111; // 8-byte align (AAPCS)
        let frame_base = top - FRAME_WORDS * core::mem::size_of::<usize>();

        // Layout matches `push {r0, r4-r11, lr}` (ascending register number
        // at ascending address): r0, r4..r11, lr. `lr` is the address
        // `micrort_context_switch`'s `pop`+`bx lr` jumps to on first resume;
        // the thumb bit is set since this is always thumb code on Cortex-M.
        let words: [usize; FRAME_WORDS] = [
            arg,
            0, 0, 0, 0, 0, 0, 0, 0,
            (entry as usize) | 1,
        ];
        // Safety: `frame_base` lies within `stack`, 8-byte aligned, with
        // room for `FRAME_WORDS` words (checked above).
        unsafe {
            let ptr = frame_base as *mut usize;
            for (i, word) in words.iter().enumerate() {
                ptr.add(i).write(*word);
            }
        }
        frame_base as *mut u8
    }

    fn mpu_write_region(region_id: u8, base: usize, size: usize, access: AccessBits) -> bool {
        mpu::write_region(region_id, base, size, access);
        true
    }

    fn mpu_enable(enabled: bool) {
        mpu::enable(enabled);
    }

    fn idle_wait_for_interrupt() {
        cortex_m::asm::wfi();
    }
}
