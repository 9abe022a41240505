//! Reactor Integration Tests for Finagle
//!
//! Drives AppLoop with timers, pipe watchers and cross-thread exits.

use finagle::config::ReactorConfig;
use finagle::queue::Queue;
use finagle::runtime::{self, AppLoop, FileDescWatcher, Timer};
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    assert_eq!(unsafe { libc::write(fd, b"!".as_ptr().cast(), 1) }, 1);
}

fn read_byte(fd: RawFd) -> u8 {
    let mut byte = 0u8;
    assert_eq!(unsafe { libc::read(fd, (&mut byte as *mut u8).cast(), 1) }, 1);
    byte
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
    let count = Rc::new(Cell::new(0));
    let bump = {
        let count = Rc::clone(&count);
        move || count.set(count.get() + 1)
    };
    (count, bump)
}

// ============================================================================
// Budget and idle
// ============================================================================

#[test]
fn test_empty_loop_respects_budget_and_idles() {
    let app = AppLoop::new();
    let (idles, bump) = counter();
    app.idle().connect(bump);

    let start = Instant::now();
    app.process(Duration::from_millis(60));
    let elapsed = start.elapsed();

    assert!(idles.get() >= 1);
    assert!(elapsed >= Duration::from_millis(60), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);
}

#[test]
fn test_exec_uses_configured_budget() {
    let app = AppLoop::with_config(ReactorConfig {
        process_time_ms: 5,
        wait_time_ms: 5,
    });
    let passes = Rc::new(Cell::new(0u32));
    {
        let app2 = app.clone();
        let passes = Rc::clone(&passes);
        app.idle().connect(move || {
            passes.set(passes.get() + 1);
            if passes.get() == 3 {
                app2.exit(11);
            }
        });
    }
    assert_eq!(app.exec(), 11);
    assert_eq!(passes.get(), 3);
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_recurring_timer_phase_is_stable() {
    let app = AppLoop::new();
    let period = Duration::from_millis(5);
    let timer = Timer::recurring(&app, period);
    let alarms = Rc::new(RefCell::new(Vec::new()));
    {
        let alarms = Rc::clone(&alarms);
        let handle = timer.clone();
        let app = app.clone();
        timer.connect(move || {
            alarms.borrow_mut().push(handle.next_alarm());
            // Simulate a slow callback so some fires are late.
            thread::sleep(Duration::from_millis(3));
            if alarms.borrow().len() == 10 {
                app.exit(0);
            }
        });
    }

    assert_eq!(app.exec(), 0);
    timer.stop();

    let alarms: Vec<Instant> = alarms.borrow().iter().flatten().copied().collect();
    assert_eq!(alarms.len(), 10);
    for pair in alarms.windows(2) {
        assert_eq!(pair[1] - pair[0], period);
    }
}

#[test]
fn test_single_shot_fires_once() {
    let app = AppLoop::new();
    let (fires, bump) = counter();
    let timer = Timer::single_shot(&app, Duration::from_millis(5));
    timer.connect(bump);

    app.process(Duration::from_millis(40));
    assert_eq!(fires.get(), 1);
    assert!(!timer.is_running());
    assert_eq!(app.timer_count(), 0);
}

#[test]
fn test_stopped_timer_never_fires() {
    let app = AppLoop::new();
    let (fires, bump) = counter();
    let timer = Timer::single_shot(&app, Duration::from_millis(5));
    timer.connect(bump);
    timer.stop();

    app.process(Duration::from_millis(20));
    assert_eq!(fires.get(), 0);
}

#[test]
fn test_exit_from_timer_callback() {
    let app = AppLoop::new();
    let timer = Timer::single_shot(&app, Duration::from_millis(5));
    let (later, bump) = counter();
    let never = Timer::single_shot(&app, Duration::from_millis(5));
    never.connect(bump);
    {
        let app = app.clone();
        timer.connect(move || app.exit(42));
    }

    assert_eq!(app.exec(), 42);
    // Both were due together; the exit is observed right after the first.
    assert!(later.get() <= 1);
}

// ============================================================================
// Descriptor watchers
// ============================================================================

#[test]
fn test_pipe_readable_dispatch() {
    let app = AppLoop::new();
    let (rd, wr) = pipe();
    let watcher = FileDescWatcher::new(&app, Some(rd));
    let got = Rc::new(RefCell::new(Vec::new()));
    {
        let got = Rc::clone(&got);
        watcher.readable().connect(move || got.borrow_mut().push(read_byte(rd)));
    }

    app.process(Duration::from_millis(10));
    assert!(got.borrow().is_empty());

    write_byte(wr);
    app.process(Duration::from_millis(10));
    assert_eq!(*got.borrow(), vec![b'!']);

    watcher.set_fd(None);
    write_byte(wr);
    app.process(Duration::from_millis(10));
    assert_eq!(got.borrow().len(), 1);

    close(rd);
    close(wr);
}

#[test]
fn test_watcher_without_subscribers_is_not_polled() {
    let app = AppLoop::new();
    let (rd, wr) = pipe();
    let _watcher = FileDescWatcher::new(&app, Some(rd));
    let (idles, bump) = counter();
    app.idle().connect(bump);

    // Readable data, but nobody listens: every iteration is idle.
    write_byte(wr);
    app.process(Duration::from_millis(10));
    assert!(idles.get() >= 1);

    close(rd);
    close(wr);
}

#[test]
fn test_writer_thread_wakes_poll_early() {
    let app = AppLoop::new();
    let (rd, wr) = pipe();
    let watcher = FileDescWatcher::new(&app, Some(rd));
    {
        let app = app.clone();
        watcher.readable().connect(move || {
            read_byte(rd);
            app.exit(5);
        });
    }

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        write_byte(wr);
        wr
    });

    let start = Instant::now();
    app.process(Duration::from_secs(10));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(app.exit_code(), 5);

    close(writer.join().unwrap());
    close(rd);
}

// ============================================================================
// Cross-thread
// ============================================================================

#[test]
fn test_exit_token_from_another_thread() {
    let app = AppLoop::with_config(ReactorConfig {
        process_time_ms: 10,
        wait_time_ms: 10,
    });
    let token = app.exit_token();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.exit(17);
    });

    assert_eq!(app.exec(), 17);
    stopper.join().unwrap();
    assert!(app.is_exit_requested());
}

#[test]
fn test_worker_results_delivered_to_loop() {
    let app = AppLoop::new();
    let results = Arc::new(Queue::new());

    let workers: Vec<_> = (0..3u64)
        .map(|n| {
            let results = Arc::clone(&results);
            thread::spawn(move || {
                runtime::wait(Duration::from_millis(5));
                results.push_back(n * 10);
            })
        })
        .collect();

    let collected = Rc::new(RefCell::new(Vec::new()));
    {
        let collected = Rc::clone(&collected);
        let results = Arc::clone(&results);
        let app2 = app.clone();
        app.idle().connect(move || {
            while let Some(n) = results.try_pop_front() {
                collected.borrow_mut().push(n);
            }
            if collected.borrow().len() == 3 {
                app2.exit(0);
            }
        });
    }

    assert_eq!(app.exec(), 0);
    for w in workers {
        w.join().unwrap();
    }
    let mut got = collected.borrow().clone();
    got.sort_unstable();
    assert_eq!(got, vec![0, 10, 20]);
}
