//! Armv7-M MPU register programming (`MPU_RNR`/`MPU_RBAR`/`MPU_RASR`).
//!
//! `Port::mpu_write_region`'s caller ([`micrort_kernel::mpu`]) has already
//! validated `region_id < 8`, `size` a power of two `>= 32`, and `base`
//! aligned to `size`; this only has to turn that into register values.
use micrort_kernel::port::AccessBits;

const MPU_CTRL: *mut u32 = 0xE000_ED94 as *mut u32;
const MPU_RNR: *mut u32 = 0xE000_ED98 as *mut u32;
const MPU_RBAR: *mut u32 = 0xE000_ED9C as *mut u32;
const MPU_RASR: *mut u32 = 0xE000_EDA0 as *mut u32;

const CTRL_ENABLE: u32 = 1 << 0;
const CTRL_PRIVDEFENA: u32 = 1 << 2;

pub fn write_region(region_id: u8, base: usize, size: usize, access: AccessBits) {
    let size_log2 = (usize::BITS - 1 - size.leading_zeros()) as u32;
    let xn: u32 = if access.contains(AccessBits::EXECUTE) { 0 } else { 1 };
    let ap: u32 = if access.contains(AccessBits::WRITE) {
        0b011 // full access, any privilege level
    } else if access.contains(AccessBits::READ) {
        0b110 // read-only, any privilege level
    } else {
        0b000 // no access
    };
    let rasr = (xn << 28) | (ap << 24) | ((size_log2 - 1) << 1) | 1;

    // Safety: `region_id`, `base`, `size` are pre-validated by the caller;
    // these are fixed core-peripheral addresses present on every Armv7-M
    // implementation with an MPU.
    unsafe {
        core::ptr::write_volatile(MPU_RNR, region_id as u32);
        core::ptr::write_volatile(MPU_RBAR, base as u32);
        core::ptr::write_volatile(MPU_RASR, rasr);
    }
}

pub fn enable(enabled: bool) {
    let value = if enabled { CTRL_ENABLE | CTRL_PRIVDEFENA } else { 0 };
    // Safety: fixed core-peripheral address.
    unsafe { core::ptr::write_volatile(MPU_CTRL, value) };
}
