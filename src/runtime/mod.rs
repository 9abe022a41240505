//! Runtime module
//!
//! Contains the cooperative single-threaded reactor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       APP LOOP (one thread)                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Timer: one-shot / recurring alarms, ordered by next alarm      │
//! │  FileDescWatcher: readable / writable / exception callbacks     │
//! │  FdSet + poll: descriptor readiness via poll(2)                 │
//! │  idle: emitted when an iteration finds nothing ready            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use finagle::runtime::{AppLoop, FileDescWatcher, Timer};
//! use std::time::Duration;
//!
//! let app = AppLoop::new();
//!
//! let tick = Timer::recurring(&app, Duration::from_millis(100));
//! tick.connect(|| println!("tick"));
//!
//! let stdin = FileDescWatcher::new(&app, Some(0));
//! let handle = app.clone();
//! stdin.readable().connect(move || handle.exit(0));
//!
//! std::process::exit(app.exec());
//! ```

mod app_loop;
mod event_loop;
mod timer;
mod watcher;

pub use app_loop::{AppLoop, ExitToken};
pub use event_loop::{poll, FdSet, Interest};
pub use timer::Timer;
pub use watcher::{FileDescWatchable, FileDescWatcher};

use crate::config::ReactorConfig;
use std::thread;
use std::time::Duration;

/// Let time pass on the calling thread.
///
/// On a thread that owns an [`AppLoop`] this drives the loop for `duration`,
/// so its timers and watchers keep running. Any other thread just sleeps.
pub fn wait(duration: Duration) {
    match AppLoop::current() {
        Some(app) => app.wait(duration),
        None => thread::sleep(duration),
    }
}

/// [`wait`] for the current loop's `wait_time_ms`, or the built-in default
/// on threads without a loop.
pub fn wait_default() {
    match AppLoop::current() {
        Some(app) => app.wait_default(),
        None => thread::sleep(ReactorConfig::default().wait_time()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Instant;

    #[test]
    fn test_wait_without_loop_sleeps() {
        thread::spawn(|| {
            let start = Instant::now();
            wait(Duration::from_millis(15));
            assert!(start.elapsed() >= Duration::from_millis(15));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_wait_default_without_loop_sleeps_built_in_time() {
        thread::spawn(|| {
            let start = Instant::now();
            wait_default();
            assert!(start.elapsed() >= ReactorConfig::default().wait_time());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_wait_drives_current_loop() {
        let app = AppLoop::new();
        let fired = Rc::new(Cell::new(false));
        let timer = Timer::single_shot(&app, Duration::from_millis(2));
        let flag = Rc::clone(&fired);
        timer.connect(move || flag.set(true));

        wait(Duration::from_millis(20));
        assert!(fired.get());
    }
}
