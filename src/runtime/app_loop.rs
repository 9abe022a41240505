//! The reactor: timers, descriptor readiness and the idle event

use super::event_loop::{self, FdSet};
use super::timer::TimerInner;
use super::watcher::FileDescWatchable;
use crate::config::ReactorConfig;
use crate::signal::Signal;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: RefCell<Weak<LoopInner>> = RefCell::new(Weak::new());
}

#[derive(Debug, Default)]
struct ExitState {
    requested: AtomicBool,
    code: AtomicI32,
}

impl ExitState {
    fn request(&self, code: i32) {
        self.code.store(code, Ordering::SeqCst);
        self.requested.store(true, Ordering::SeqCst);
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Cooperative cancellation for an [`AppLoop`], usable from any thread.
///
/// The loop observes the request at the top of each iteration and after
/// every callback it runs.
#[derive(Clone, Debug)]
pub struct ExitToken {
    state: Arc<ExitState>,
}

impl ExitToken {
    /// Ask the loop to stop, making `exec` return `code`.
    pub fn exit(&self, code: i32) {
        log::debug!("exit({code}) requested");
        self.state.request(code);
    }

    pub fn is_exit_requested(&self) -> bool {
        self.state.is_requested()
    }
}

pub(crate) struct LoopInner {
    config: ReactorConfig,
    exit: Arc<ExitState>,
    // Running timers, ascending by next alarm.
    timers: RefCell<Vec<Rc<TimerInner>>>,
    watchers: RefCell<Vec<Weak<dyn FileDescWatchable>>>,
    idle: Signal,
}

impl LoopInner {
    /// Insert behind every timer due at or before `timer`.
    pub(crate) fn schedule(&self, timer: Rc<TimerInner>) {
        let alarm = timer.next_alarm();
        let mut timers = self.timers.borrow_mut();
        let at = timers.partition_point(|t| t.next_alarm() <= alarm);
        timers.insert(at, timer);
    }

    pub(crate) fn unschedule(&self, timer: &Rc<TimerInner>) -> bool {
        let mut timers = self.timers.borrow_mut();
        match timers.iter().position(|t| Rc::ptr_eq(t, timer)) {
            Some(i) => {
                timers.remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn activate(&self, watchable: Weak<dyn FileDescWatchable>) {
        let mut watchers = self.watchers.borrow_mut();
        if !watchers.iter().any(|w| Weak::ptr_eq(w, &watchable)) {
            watchers.push(watchable);
        }
    }

    pub(crate) fn deactivate(&self, watchable: &Weak<dyn FileDescWatchable>) {
        self.watchers
            .borrow_mut()
            .retain(|w| !Weak::ptr_eq(w, watchable));
    }

    pub(crate) fn is_active(&self, watchable: &Weak<dyn FileDescWatchable>) -> bool {
        self.watchers
            .borrow()
            .iter()
            .any(|w| Weak::ptr_eq(w, watchable))
    }

    fn front_timer(&self) -> Option<Rc<TimerInner>> {
        self.timers.borrow().first().cloned()
    }

    // Upgrade the active set, dropping entries whose watchable is gone.
    fn live_watchers(&self) -> Vec<Rc<dyn FileDescWatchable>> {
        let mut watchers = self.watchers.borrow_mut();
        let mut live = Vec::with_capacity(watchers.len());
        watchers.retain(|w| match w.upgrade() {
            Some(w) => {
                live.push(w);
                true
            }
            None => false,
        });
        live
    }
}

/// Single-threaded reactor driving [`Timer`](super::Timer)s and
/// [`FileDescWatcher`](super::FileDescWatcher)s.
///
/// An `AppLoop` belongs to the thread that created it: it is neither `Send`
/// nor `Sync`, and only that thread can run its callbacks. Clones share the
/// same loop. The first loop created on a thread becomes that thread's
/// [`current`](Self::current) loop.
///
/// ```
/// use finagle::runtime::{AppLoop, Timer};
/// use std::time::Duration;
///
/// let app = AppLoop::new();
/// let timer = Timer::single_shot(&app, Duration::from_millis(1));
/// let handle = app.clone();
/// timer.connect(move || handle.exit(3));
/// assert_eq!(app.exec(), 3);
/// ```
#[derive(Clone)]
pub struct AppLoop {
    inner: Rc<LoopInner>,
}

impl AppLoop {
    pub fn new() -> Self {
        Self::with_config(ReactorConfig::default())
    }

    pub fn with_config(config: ReactorConfig) -> Self {
        let inner = Rc::new(LoopInner {
            config,
            exit: Arc::new(ExitState::default()),
            timers: RefCell::new(Vec::new()),
            watchers: RefCell::new(Vec::new()),
            idle: Signal::new(),
        });
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.upgrade().is_none() {
                *current = Rc::downgrade(&inner);
            }
        });
        Self { inner }
    }

    /// The loop owned by the calling thread, if it has one.
    pub fn current() -> Option<AppLoop> {
        CURRENT
            .with(|current| current.borrow().upgrade())
            .map(|inner| AppLoop { inner })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.inner.config
    }

    /// Run passes of [`process`](Self::process) until an exit is requested,
    /// then return the exit code. Any exit requested before the call is
    /// discarded.
    pub fn exec(&self) -> i32 {
        let exit = &self.inner.exit;
        exit.code.store(0, Ordering::SeqCst);
        exit.requested.store(false, Ordering::SeqCst);
        log::debug!("exec: entering loop");

        let budget = self.inner.config.process_time();
        while !exit.is_requested() {
            self.process(budget);
        }

        let code = self.exit_code();
        log::debug!("exec: leaving loop with code {code}");
        code
    }

    /// Request that [`exec`](Self::exec) return `code`.
    pub fn exit(&self, code: i32) {
        log::debug!("exit({code}) requested");
        self.inner.exit.request(code);
    }

    pub fn exit_token(&self) -> ExitToken {
        ExitToken {
            state: Arc::clone(&self.inner.exit),
        }
    }

    pub fn is_exit_requested(&self) -> bool {
        self.inner.exit.is_requested()
    }

    pub fn exit_code(&self) -> i32 {
        self.inner.exit.code.load(Ordering::SeqCst)
    }

    /// Emitted once per iteration in which nothing was ready.
    pub fn idle(&self) -> &Signal {
        &self.inner.idle
    }

    /// Drive the loop for `duration`.
    pub fn wait(&self, duration: Duration) {
        self.process(duration);
    }

    /// Drive the loop for the configured `wait_time_ms`.
    pub fn wait_default(&self) {
        self.wait(self.inner.config.wait_time());
    }

    /// Add a watchable to the active set. The set only holds a weak
    /// reference; a dropped watchable disappears on the next pass.
    pub fn activate(&self, watchable: Weak<dyn FileDescWatchable>) {
        self.inner.activate(watchable);
    }

    pub fn deactivate(&self, watchable: &Weak<dyn FileDescWatchable>) {
        self.inner.deactivate(watchable);
    }

    /// Number of running timers.
    pub fn timer_count(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Number of live watchables in the active set.
    pub fn watcher_count(&self) -> usize {
        self.inner
            .watchers
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Fire due timers and dispatch ready descriptors for up to `max_time`.
    ///
    /// Each iteration first fires every timer already due, then polls the
    /// active watchers without blocking. If nothing is ready it emits
    /// [`idle`](Self::idle) and blocks until the nearest timer within the
    /// remaining budget, or the end of the budget, firing that one timer if
    /// the wait ran out. Returns early when an exit is requested or the poll
    /// fails.
    pub fn process(&self, max_time: Duration) {
        let inner = &*self.inner;
        let deadline = Instant::now() + max_time;

        loop {
            if self.is_exit_requested() {
                return;
            }
            let now = Instant::now();

            let mut next_timer = None;
            while let Some(timer) = inner.front_timer() {
                if !timer.is_due(now) {
                    next_timer = Some(timer);
                    break;
                }
                timer.trigger(inner);
                if self.is_exit_requested() {
                    return;
                }
            }

            let remaining = deadline.saturating_duration_since(now);
            let next_timer = next_timer.filter(|timer| {
                timer
                    .next_alarm()
                    .is_some_and(|alarm| alarm.saturating_duration_since(now) <= remaining)
            });

            let mut set = FdSet::new();
            let selected: Vec<_> = inner
                .live_watchers()
                .into_iter()
                .filter(|w| w.fds(&mut set))
                .collect();

            let mut ready = 0;
            if !selected.is_empty() {
                ready = match event_loop::poll(&mut set, Duration::ZERO) {
                    Ok(n) => n,
                    Err(err) => {
                        log::error!("{err}");
                        return;
                    }
                };
            }

            if ready == 0 {
                inner.idle.emit();
                if self.is_exit_requested() {
                    return;
                }

                let now = Instant::now();
                let mut wait = deadline.saturating_duration_since(now);
                if let Some(alarm) = next_timer.as_ref().and_then(|t| t.next_alarm()) {
                    wait = wait.min(alarm.saturating_duration_since(now));
                }

                if selected.is_empty() {
                    thread::sleep(wait);
                } else {
                    ready = match event_loop::poll(&mut set, wait) {
                        Ok(n) => n,
                        Err(err) => {
                            log::error!("{err}");
                            return;
                        }
                    };
                }
            }

            if ready == 0 {
                if let Some(timer) = next_timer.filter(|t| t.is_due(Instant::now())) {
                    timer.trigger(inner);
                    if self.is_exit_requested() {
                        return;
                    }
                }
            } else {
                log::trace!("{ready} descriptor(s) ready");
                for watcher in &selected {
                    let serviced = watcher.on_select(&set);
                    if self.is_exit_requested() {
                        return;
                    }
                    ready = ready.saturating_sub(serviced);
                    if ready == 0 {
                        break;
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<LoopInner> {
        Rc::downgrade(&self.inner)
    }
}

impl Default for AppLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AppLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppLoop")
            .field("config", &self.inner.config)
            .field("timers", &self.timer_count())
            .field("watchers", &self.watcher_count())
            .field("exit_requested", &self.is_exit_requested())
            .finish()
    }
}
