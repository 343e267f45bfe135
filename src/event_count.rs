//! A condition variable for lock-free/wait-free algorithms, adapted from
//! `folly::EventCount` (as referenced by the scheduler this crate's worker loop is
//! modeled on) but built on `parking_lot::Mutex` + `Condvar` rather than raw atomic
//! wait/notify, matching the blocking primitives this crate's other modules already
//! use (see [`crate::submission`]).
//!
//! Usage mirrors a condition variable with one crucial difference: the "check
//! condition, then wait" race is closed by calling [`EventCount::prepare_wait`]
//! *before* re-checking the condition, so a notification that happens between the
//! check and the wait is never lost.

use parking_lot::{Condvar, Mutex};

struct State {
    epoch: u32,
    waiters: u32,
}

pub struct EventCount {
    state: Mutex<State>,
    condvar: Condvar,
}

/// A token returned by [`EventCount::prepare_wait`]; must be consumed by exactly one
/// of [`EventCount::wait`] or [`EventCount::cancel_wait`].
pub struct Key {
    epoch: u32,
}

impl Default for EventCount {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCount {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { epoch: 0, waiters: 0 }),
            condvar: Condvar::new(),
        }
    }

    #[must_use]
    pub fn prepare_wait(&self) -> Key {
        let mut state = self.state.lock();
        state.waiters += 1;
        Key { epoch: state.epoch }
    }

    pub fn cancel_wait(&self) {
        let mut state = self.state.lock();
        state.waiters -= 1;
    }

    pub fn wait(&self, key: Key) {
        let mut state = self.state.lock();
        while state.epoch == key.epoch {
            self.condvar.wait(&mut state);
        }
        state.waiters -= 1;
    }

    pub fn notify_one(&self) {
        let mut state = self.state.lock();
        state.epoch = state.epoch.wrapping_add(1);
        let has_waiters = state.waiters > 0;
        drop(state);
        if has_waiters {
            self.condvar.notify_one();
        }
    }

    pub fn notify_all(&self) {
        let mut state = self.state.lock();
        state.epoch = state.epoch.wrapping_add(1);
        let has_waiters = state.waiters > 0;
        drop(state);
        if has_waiters {
            self.condvar.notify_all();
        }
    }

    /// Blocks until `condition()` returns `true`, re-checking after every wake
    /// (spurious or real) exactly as a condition variable requires.
    pub fn await_condition(&self, mut condition: impl FnMut() -> bool) {
        if condition() {
            return;
        }
        loop {
            let key = self.prepare_wait();
            if condition() {
                self.cancel_wait();
                return;
            }
            self.wait(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_wakes_waiter() {
        let ec = Arc::new(EventCount::new());
        let ready = Arc::new(AtomicBool::new(false));

        let ec2 = ec.clone();
        let ready2 = ready.clone();
        let handle = thread::spawn(move || {
            ec2.await_condition(|| ready2.load(Ordering::Acquire));
        });

        thread::sleep(Duration::from_millis(20));
        ready.store(true, Ordering::Release);
        ec.notify_all();

        handle.join().unwrap();
    }

    #[test]
    fn no_lost_wakeup_when_condition_set_before_wait() {
        let ec = EventCount::new();
        let key = ec.prepare_wait();
        ec.notify_all();
        // condition is already true by the time we'd check it; cancel instead of wait.
        ec.cancel_wait();
        drop(key);
    }
}
