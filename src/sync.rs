//! Critical-section guarded timer state.
//!
//! Button callbacks run in interrupt context and call timer mutators while
//! the main loop reads lap state for the display. Each timer lives in a
//! single [`TimerCell`] so every access observes a consistent snapshot; a
//! lap mark or reset can never land in the middle of a read. Fields of one
//! timer are never split across separately guarded variables.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// One logical unit of timer state behind a short critical section.
///
/// `const`-constructible so the application can keep its timers in
/// `static`s reachable from interrupt handlers.
pub struct TimerCell<T> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<T>>,
}

impl<T> TimerCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` on the state inside the critical section. Keep the closure
    /// short; interrupts are masked for its duration.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }

    /// Copy the whole state out for lock-free consumption.
    pub fn snapshot(&self) -> T
    where
        T: Copy,
    {
        self.inner.lock(|cell| *cell.borrow())
    }
}
