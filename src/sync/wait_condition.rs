//! Condition variable with its own recursive lock
//!
//! A [`WaitCondition`] is a [`Mutex`] that threads can sleep on. The hand-off
//! used by the blocking queues is:
//!
//! 1. the waiter holds the queue's guard and sees nothing to do,
//! 2. it takes the condition's own lock,
//! 3. it releases the guard,
//! 4. it sleeps, giving up the condition's lock atomically.
//!
//! Signalers do not need to hold any lock: [`signal_one`](WaitCondition::signal_one)
//! and [`signal_all`](WaitCondition::signal_all) wait for the condition's lock
//! to be free of other owners before counting the wakeup, so a waiter caught
//! between steps 2 and 4 is always already registered when the signal lands.

use super::mutex::Mutex;
use parking_lot::Condvar;
use std::fmt;
use std::ops::Deref;
use std::thread;
use std::time::{Duration, Instant};

/// Condition variable usable across OS threads.
#[derive(Default)]
pub struct WaitCondition {
    mutex: Mutex<()>,
    signal: Condvar,
}

impl WaitCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until signaled.
    ///
    /// Any ownership the caller holds on this condition's lock is released
    /// while sleeping and restored before returning.
    pub fn wait(&self) {
        self.block(None, 0);
    }

    /// Sleep until signaled or until `timeout` elapses. Returns `true` if
    /// signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.block(Some(timeout), 0)
    }

    /// Take this condition's lock, drop `external` (typically a guard on the
    /// state being waited for), then sleep. Returns holding neither lock;
    /// `true` if signaled, `false` if `timeout` elapsed first.
    pub fn wait_with<G>(&self, external: G, timeout: Option<Duration>) -> bool {
        self.mutex.acquire();
        drop(external);
        self.block(timeout, 1)
    }

    /// Wake at most one waiter. No-op when nobody is waiting.
    pub fn signal_one(&self) {
        self.notify(false);
    }

    /// Wake every current waiter.
    pub fn signal_all(&self) {
        self.notify(true);
    }

    /// Number of threads asleep on this condition that no broadcast has
    /// released yet.
    pub fn waiters(&self) -> usize {
        self.mutex.raw().state.lock().sleepers
    }

    fn block(&self, timeout: Option<Duration>, drop_levels: usize) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let raw = self.mutex.raw();
        let me = thread::current().id();

        let mut state = raw.state.lock();
        raw.wait_unowned(&mut state, me);
        let depth = raw.release_all(&mut state, me);
        let epoch = state.broadcasts;
        state.sleepers += 1;

        let mut expired = false;
        let signaled = loop {
            if state.broadcasts != epoch {
                break true;
            }
            if state.wakeups > 0 {
                state.wakeups -= 1;
                break true;
            }
            if expired {
                break false;
            }
            match deadline {
                None => self.signal.wait(&mut state),
                Some(deadline) => {
                    expired = self.signal.wait_until(&mut state, deadline).timed_out();
                }
            }
        };

        // A broadcast already took every sleeper of its epoch off the count.
        if state.broadcasts == epoch {
            state.sleepers -= 1;
        }
        raw.restore(&mut state, me, depth.saturating_sub(drop_levels));
        signaled
    }

    fn notify(&self, all: bool) {
        let raw = self.mutex.raw();
        let me = thread::current().id();

        let mut state = raw.state.lock();
        raw.wait_unowned(&mut state, me);
        if all {
            if state.sleepers == 0 {
                return;
            }
            state.broadcasts = state.broadcasts.wrapping_add(1);
            state.sleepers = 0;
            state.wakeups = 0;
            self.signal.notify_all();
        } else {
            if state.wakeups >= state.sleepers {
                return;
            }
            state.wakeups += 1;
            self.signal.notify_one();
        }
    }
}

impl Deref for WaitCondition {
    type Target = Mutex<()>;

    fn deref(&self) -> &Mutex<()> {
        &self.mutex
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.mutex.raw().state.lock();
        f.debug_struct("WaitCondition")
            .field("owner", &state.owner)
            .field("sleepers", &state.sleepers)
            .field("wakeups", &state.wakeups)
            .field("broadcasts", &state.broadcasts)
            .finish()
    }
}
