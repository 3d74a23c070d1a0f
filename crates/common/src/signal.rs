//! Single-slot binary signal
//!
//! A `give` sets the slot, a `take` waits (bounded) for it and clears it.
//! Gives that land while the slot is already set collapse into one, so a
//! waiter observes "something changed since my last take", not a count.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Signal {
    given: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub const fn new() -> Self {
        Self {
            given: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Set the slot and wake a waiter
    pub fn give(&self) {
        let mut given = self.given.lock().unwrap_or_else(PoisonError::into_inner);
        *given = true;
        self.cond.notify_one();
    }

    /// Wait up to `timeout` for the slot, clearing it on success
    pub fn take(&self, timeout: Duration) -> bool {
        let given = self.given.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut given, _) = self
            .cond
            .wait_timeout_while(given, timeout, |given| !*given)
            .unwrap_or_else(PoisonError::into_inner);

        let taken = *given;
        *given = false;
        taken
    }

    /// Clear the slot without waiting
    pub fn try_take(&self) -> bool {
        let mut given = self.given.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *given, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_times_out_when_not_given() {
        let signal = Signal::new();
        assert!(!signal.take(Duration::from_millis(10)));
    }

    #[test]
    fn test_gives_collapse() {
        let signal = Signal::new();
        signal.give();
        signal.give();
        assert!(signal.take(Duration::from_millis(10)));
        assert!(!signal.try_take());
    }

    #[test]
    fn test_cross_thread_give() {
        let signal = Arc::new(Signal::new());
        let giver = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            giver.give();
        });

        assert!(signal.take(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
