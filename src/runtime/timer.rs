//! One-shot and recurring alarms driven by an [`AppLoop`]

use super::app_loop::{AppLoop, LoopInner};
use crate::signal::{Signal, SlotId};
use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Shortest period a recurring timer may have.
const MIN_PERIOD: Duration = Duration::from_micros(1);

pub(crate) struct TimerInner {
    next_alarm: Cell<Option<Instant>>,
    period: Cell<Duration>,
    repeat: Cell<bool>,
    // Bumped by every start/stop so a firing timer can tell whether its
    // callbacks rescheduled it.
    generation: Cell<u64>,
    fired: Signal,
    reactor: Weak<LoopInner>,
}

impl TimerInner {
    pub(crate) fn next_alarm(&self) -> Option<Instant> {
        self.next_alarm.get()
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.next_alarm.get().is_some_and(|alarm| alarm <= now)
    }

    fn start(self: &Rc<Self>) {
        let Some(reactor) = self.reactor.upgrade() else {
            log::warn!("timer started after its reactor was dropped");
            return;
        };
        reactor.unschedule(self);
        self.generation.set(self.generation.get().wrapping_add(1));
        self.next_alarm.set(Some(Instant::now() + self.period.get()));
        reactor.schedule(Rc::clone(self));
    }

    fn stop(self: &Rc<Self>) {
        self.generation.set(self.generation.get().wrapping_add(1));
        if self.next_alarm.take().is_none() {
            return;
        }
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.unschedule(self);
        }
    }

    /// Fire now. Called by the reactor once the alarm is due.
    ///
    /// A repeating timer is re-armed at `old alarm + period`, so a late fire
    /// does not shift the phase, unless a callback stopped or restarted it.
    pub(crate) fn trigger(self: &Rc<Self>, reactor: &LoopInner) {
        let Some(alarm) = self.next_alarm.get() else {
            return;
        };
        reactor.unschedule(self);
        let repeat = self.repeat.get();
        if !repeat {
            self.next_alarm.set(None);
        }
        let generation = self.generation.get();

        self.fired.emit();

        if repeat && self.generation.get() == generation {
            self.next_alarm.set(Some(alarm + self.period.get()));
            reactor.schedule(Rc::clone(self));
        }
    }
}

/// Handle on a timer registered with an [`AppLoop`].
///
/// Clones share the same timer. While running, the loop keeps the timer
/// alive even if every handle is dropped; a stopped timer goes away with its
/// last handle.
///
/// ```
/// use finagle::runtime::{AppLoop, Timer};
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let app = AppLoop::new();
/// let fired = Rc::new(Cell::new(false));
/// let timer = Timer::single_shot(&app, Duration::from_millis(5));
/// let flag = Rc::clone(&fired);
/// timer.connect(move || flag.set(true));
///
/// app.process(Duration::from_millis(50));
/// assert!(fired.get());
/// assert!(!timer.is_running());
/// ```
#[derive(Clone)]
pub struct Timer {
    inner: Rc<TimerInner>,
}

impl Timer {
    /// Create a timer on `app` and start it.
    pub fn new(app: &AppLoop, period: Duration, repeat: bool) -> Self {
        let period = if repeat { period.max(MIN_PERIOD) } else { period };
        let timer = Self {
            inner: Rc::new(TimerInner {
                next_alarm: Cell::new(None),
                period: Cell::new(period),
                repeat: Cell::new(repeat),
                generation: Cell::new(0),
                fired: Signal::new(),
                reactor: app.downgrade(),
            }),
        };
        timer.start();
        timer
    }

    /// Fire once, `delay` from now.
    pub fn single_shot(app: &AppLoop, delay: Duration) -> Self {
        Self::new(app, delay, false)
    }

    /// Fire every `period`, starting one period from now.
    pub fn recurring(app: &AppLoop, period: Duration) -> Self {
        Self::new(app, period, true)
    }

    /// Schedule the next alarm one period from now, discarding any pending
    /// alarm.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Change the period, then [`start`](Self::start).
    pub fn start_with(&self, period: Duration) {
        let period = if self.inner.repeat.get() {
            period.max(MIN_PERIOD)
        } else {
            period
        };
        self.inner.period.set(period);
        self.inner.start();
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn restart(&self) {
        self.inner.stop();
        self.inner.start();
    }

    pub fn is_running(&self) -> bool {
        self.inner.next_alarm.get().is_some()
    }

    /// When the timer fires next, `None` while stopped.
    pub fn next_alarm(&self) -> Option<Instant> {
        self.inner.next_alarm.get()
    }

    pub fn period(&self) -> Duration {
        self.inner.period.get()
    }

    pub fn is_repeating(&self) -> bool {
        self.inner.repeat.get()
    }

    /// Callbacks invoked on every fire.
    pub fn on_fire(&self) -> &Signal {
        &self.inner.fired
    }

    pub fn connect<F: Fn() + 'static>(&self, f: F) -> SlotId {
        self.inner.fired.connect(f)
    }

    pub fn ptr_eq(&self, other: &Timer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.next_alarm() == other.next_alarm()
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.next_alarm().partial_cmp(&other.next_alarm())
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("next_alarm", &self.next_alarm())
            .field("period", &self.period())
            .field("repeat", &self.is_repeating())
            .field("callbacks", &self.inner.fired.len())
            .finish()
    }
}
