//! MPU region configuration (§4.11): a thin, validating pass-through to
//! [`Port::mpu_write_region`]/[`Port::mpu_enable`].
use crate::error::Error;
use crate::port::{AccessBits, Port};

/// Number of region slots the interface exposes, matching `region_id ∈ [0,8)`.
pub const MPU_REGION_COUNT: u8 = 8;

/// Validate and program MPU region `region_id` (§4.11 "Constraints"):
/// `size` must be a power of two no smaller than 32 bytes, and `base` must
/// be aligned to `size`. Ports without an MPU report success trivially
/// (`Port::mpu_write_region`'s `false` return means "no MPU", not
/// "rejected" — both are surfaced the same way here since from the
/// caller's point of view a region that silently does nothing and a
/// region on a platform with no MPU to program are indistinguishable).
pub fn set_region<P: Port>(region_id: u8, base: usize, size: usize, access: AccessBits) -> Result<(), Error> {
    if region_id >= MPU_REGION_COUNT {
        return Err(Error::InvalidParam);
    }
    if size < 32 || !size.is_power_of_two() {
        return Err(Error::InvalidParam);
    }
    if base % size != 0 {
        return Err(Error::InvalidParam);
    }
    P::mpu_write_region(region_id, base, size, access);
    Ok(())
}

/// Enable or disable MPU enforcement globally. No-op on platforms without
/// an MPU.
pub fn enable<P: Port>(enabled: bool) {
    P::mpu_enable(enabled);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePort;
    unsafe impl Port for FakePort {
        type CriticalToken = ();
        fn critical_enter() -> () {}
        unsafe fn critical_exit(_: ()) {}
        fn tick_source_init(_: u32) {}
        unsafe fn context_switch(_: *mut *mut u8, _: *mut *mut u8) {}
        fn initial_stack_frame(_: &mut [u8], _: fn(usize), _: usize) -> *mut u8 {
            core::ptr::null_mut()
        }
    }

    #[test]
    fn rejects_region_id_out_of_range() {
        assert_eq!(
            set_region::<FakePort>(8, 0, 32, AccessBits::READ),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn rejects_non_power_of_two_size() {
        assert_eq!(
            set_region::<FakePort>(0, 0, 48, AccessBits::READ),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn rejects_size_below_minimum() {
        assert_eq!(
            set_region::<FakePort>(0, 0, 16, AccessBits::READ),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn rejects_misaligned_base() {
        assert_eq!(
            set_region::<FakePort>(0, 33, 32, AccessBits::READ),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn accepts_aligned_region() {
        assert_eq!(set_region::<FakePort>(0, 64, 64, AccessBits::READ), Ok(()));
    }
}
