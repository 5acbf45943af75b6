//! Software timers (§4.10): a singly-linked list sorted ascending by
//! expiration tick, processed from the tick hook.
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::critical;
use crate::error::Error;
use crate::port::Port;

/// One-shot timers fire once and go inactive; auto-reload timers rearm
/// themselves with the same period after every callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    AutoReload,
}

/// A software timer. Expected to be declared as a `'static` object (e.g.
/// `static MY_TIMER: Timer = Timer::new(...)`); [`TimerList::start`] links
/// it in by `&'static` reference rather than by copying it into a pool, so
/// its callback and opaque argument live exactly as long as the timer
/// object itself.
pub struct Timer {
    mode: TimerMode,
    period: Cell<u32>,
    expire_tick: Cell<u64>,
    active: AtomicBool,
    callback: fn(usize),
    arg: usize,
    next: Cell<Option<&'static Timer>>,
}

// Safety: every non-atomic field is only ever touched from inside a
// critical section (every `TimerList` method below takes one), giving
// exclusive access on the single-core targets this kernel supports.
unsafe impl Sync for Timer {}

impl Timer {
    pub const fn new(mode: TimerMode, period: u32, callback: fn(usize), arg: usize) -> Self {
        Timer {
            mode,
            period: Cell::new(period),
            expire_tick: Cell::new(0),
            active: AtomicBool::new(false),
            callback,
            arg,
            next: Cell::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// The manager of all active software timers: a single list sorted
/// ascending by `expire_tick`. Every active timer appears exactly once;
/// inactive timers are unlinked (`next == None`, ignoring stale fields).
pub struct TimerList {
    head: Cell<Option<&'static Timer>>,
}

// Safety: see `Timer`.
unsafe impl Sync for TimerList {}

impl TimerList {
    pub const fn new() -> Self {
        TimerList {
            head: Cell::new(None),
        }
    }

    fn unlink(&self, timer: &'static Timer) {
        let mut cursor = self.head.get();
        let mut prev: Option<&'static Timer> = None;
        while let Some(cur) = cursor {
            if core::ptr::eq(cur, timer) {
                match prev {
                    Some(p) => p.next.set(cur.next.get()),
                    None => self.head.set(cur.next.get()),
                }
                cur.next.set(None);
                return;
            }
            prev = Some(cur);
            cursor = cur.next.get();
        }
    }

    fn insert_sorted(&self, timer: &'static Timer) {
        let mut cursor = self.head.get();
        let mut prev: Option<&'static Timer> = None;
        while let Some(cur) = cursor {
            if cur.expire_tick.get() > timer.expire_tick.get() {
                break;
            }
            prev = Some(cur);
            cursor = cur.next.get();
        }
        timer.next.set(cursor);
        match prev {
            Some(p) => p.next.set(Some(timer)),
            None => self.head.set(Some(timer)),
        }
        if let Some(next) = cursor {
            let _ = next; // doubly-linking is unnecessary: we only ever walk forward from head.
        }
    }

    /// Start (or restart) `timer` so it next fires at `now + period`.
    /// Rejects `period == 0` (§8 boundary behavior).
    pub fn start<P: Port>(&self, timer: &'static Timer, now: u64) -> Result<(), Error> {
        let _g = critical::enter::<P>();
        if timer.period.get() == 0 {
            return Err(Error::InvalidParam);
        }
        if timer.is_active() {
            self.unlink(timer);
        }
        timer.expire_tick.set(now + timer.period.get() as u64);
        timer.active.store(true, Ordering::Release);
        self.insert_sorted(timer);
        Ok(())
    }

    pub fn stop<P: Port>(&self, timer: &'static Timer) {
        let _g = critical::enter::<P>();
        if timer.is_active() {
            self.unlink(timer);
            timer.active.store(false, Ordering::Release);
        }
    }

    pub fn change_period<P: Port>(&self, timer: &'static Timer, period: u32) -> Result<(), Error> {
        let _g = critical::enter::<P>();
        if period == 0 {
            return Err(Error::InvalidParam);
        }
        timer.period.set(period);
        Ok(())
    }

    /// Reset `timer` so it next fires `timer`'s period ticks from `now`
    /// (§4.10 "Reset"), regardless of how much of its current period has
    /// already elapsed. Identical to `start`, which is already defined as
    /// "start or restart".
    pub fn reset<P: Port>(&self, timer: &'static Timer, now: u64) -> Result<(), Error> {
        self.start::<P>(timer, now)
    }

    /// Permanently deactivate `timer` (§4.10 "Delete"). `Timer`s are
    /// `'static` objects owned by the caller rather than slots in a pool,
    /// so there is no backing storage to actually free here — unlinking and
    /// clearing `active`, exactly what `stop` already does, is the whole of
    /// "delete" at this layer.
    pub fn delete<P: Port>(&self, timer: &'static Timer) {
        self.stop::<P>(timer)
    }

    /// Fire every timer whose `expire_tick <= now`, in ascending order.
    /// Each callback is invoked with the critical section released (§4.10
    /// "Process"), so a callback may itself call `start`/`stop` on any
    /// timer, including its own, or any other non-blocking kernel API.
    pub fn process<P: Port>(&self, now: u64) {
        loop {
            let due = {
                let _g = critical::enter::<P>();
                match self.head.get() {
                    Some(t) if t.expire_tick.get() <= now => {
                        self.unlink(t);
                        t.active.store(false, Ordering::Release);
                        t
                    }
                    _ => break,
                }
            };

            crate::trace::timer_fired(due.period.get());
            (due.callback)(due.arg);

            let _g = critical::enter::<P>();
            if due.mode == TimerMode::AutoReload {
                due.expire_tick.set(now + due.period.get() as u64);
                due.active.store(true, Ordering::Release);
                self.insert_sorted(due);
            }
        }
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

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

    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);
    fn bump(_: usize) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    static ONE_SHOT: Timer = Timer::new(TimerMode::OneShot, 100, bump, 0);
    static AUTO: Timer = Timer::new(TimerMode::AutoReload, 100, bump, 0);

    #[test]
    fn rejects_zero_period() {
        static ZERO: Timer = Timer::new(TimerMode::OneShot, 0, bump, 0);
        let list = TimerList::new();
        assert_eq!(list.start::<FakePort>(&ZERO, 0), Err(Error::InvalidParam));
    }

    #[test]
    fn one_shot_fires_once_then_inactive() {
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let list = TimerList::new();
        list.start::<FakePort>(&ONE_SHOT, 0).unwrap();
        list.process::<FakePort>(50);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 0);
        list.process::<FakePort>(100);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
        assert!(!ONE_SHOT.is_active());
        list.process::<FakePort>(1000);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_reload_cadence_over_ten_periods() {
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let list = TimerList::new();
        list.start::<FakePort>(&AUTO, 0).unwrap();
        for now in 0..=1050u64 {
            list.process::<FakePort>(now);
        }
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 10);
        list.stop::<FakePort>(&AUTO);
    }

    #[test]
    fn reset_rearms_from_the_new_now() {
        static RESET_ME: Timer = Timer::new(TimerMode::OneShot, 100, bump, 0);
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let list = TimerList::new();
        list.start::<FakePort>(&RESET_ME, 0).unwrap();
        list.process::<FakePort>(50);
        list.reset::<FakePort>(&RESET_ME, 50).unwrap();
        list.process::<FakePort>(100);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 0, "reset should have pushed expiry to 150");
        list.process::<FakePort>(150);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_stops_and_leaves_timer_inactive() {
        static DELETE_ME: Timer = Timer::new(TimerMode::OneShot, 100, bump, 0);
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let list = TimerList::new();
        list.start::<FakePort>(&DELETE_ME, 0).unwrap();
        list.delete::<FakePort>(&DELETE_ME);
        assert!(!DELETE_ME.is_active());
        list.process::<FakePort>(1000);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn list_stays_sorted_with_interleaved_starts() {
        static A: Timer = Timer::new(TimerMode::OneShot, 300, bump, 0);
        static B: Timer = Timer::new(TimerMode::OneShot, 100, bump, 0);
        static C: Timer = Timer::new(TimerMode::OneShot, 200, bump, 0);
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let list = TimerList::new();
        list.start::<FakePort>(&A, 0).unwrap();
        list.start::<FakePort>(&B, 0).unwrap();
        list.start::<FakePort>(&C, 0).unwrap();
        list.process::<FakePort>(100);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
        list.process::<FakePort>(200);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 2);
        list.process::<FakePort>(300);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 3);
    }
}
