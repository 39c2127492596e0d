//! Binary wait event.
//!
//! An [`Event`] is a level-triggered flag that threads can block on. It is the
//! "wait event" every thread slot, client-wait slot and gate slot owns. It is
//! built from a `parking_lot` mutex and condition variable, and it does not
//! implement poisoning.
//!
//! The event stays set until someone resets it. A `set` that happens before the
//! waiter reaches [`Event::wait`] is therefore never lost. The suspend/resume
//! protocol depends on this.
//!
//! # Examples
//!
//! ```
//! use engine_kernel::Event;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let event = Arc::new(Event::new());
//! let setter = Arc::clone(&event);
//!
//! thread::spawn(move || setter.set());
//!
//! event.wait();
//! assert!(event.is_set());
//! ```

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct EventState {
    is_set: bool,
    /// Bumped on every reset-to-set transition.
    signal_count: u64,
}

/// A resettable binary event.
#[derive(Debug, Default)]
pub struct Event {
    state: Mutex<EventState>,
    cvar: Condvar,
}

impl Event {
    /// Creates a new event in the reset state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event and wakes every thread blocked on it.
    pub fn set(&self) {
        let mut state = self.state.lock();
        if !state.is_set {
            state.is_set = true;
            state.signal_count = state.signal_count.wrapping_add(1);
            self.cvar.notify_all();
        }
    }

    /// Resets the event. Returns the signal count observed at reset time.
    pub fn reset(&self) -> u64 {
        let mut state = self.state.lock();
        state.is_set = false;
        state.signal_count
    }

    /// Returns true if the event is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.state.lock().is_set
    }

    /// Number of times the event went from reset to set.
    #[must_use]
    pub fn signal_count(&self) -> u64 {
        self.state.lock().signal_count
    }

    /// Blocks until the event is set. Returns at once if it already is.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !state.is_set {
            self.cvar.wait(&mut state);
        }
    }

    /// Blocks until the event is set or `timeout` elapses.
    ///
    /// Returns `true` if the event was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.is_set {
            return true;
        }
        let _ = self
            .cvar
            .wait_while_for(&mut state, |s| !s.is_set, timeout);
        state.is_set
    }
}
