//! Descriptor readiness subscriptions

use super::app_loop::{AppLoop, LoopInner};
use super::event_loop::{FdSet, Interest};
use crate::signal::Signal;
use std::cell::Cell;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

/// Something the reactor polls on each pass.
///
/// Implementors register through [`AppLoop::activate`]. Transports that
/// watch several descriptors implement this directly; single descriptors
/// are usually served by [`FileDescWatcher`].
pub trait FileDescWatchable {
    /// Record the descriptors and conditions of interest for this pass.
    /// Returns `false` to be skipped entirely.
    fn fds(&self, set: &mut FdSet) -> bool;

    /// Dispatch whatever the poll reported ready. Returns how many ready
    /// descriptors were serviced.
    fn on_select(&self, set: &FdSet) -> usize;
}

pub(crate) struct WatcherInner {
    fd: Cell<Option<RawFd>>,
    readable: Signal,
    writable: Signal,
    exception: Signal,
    reactor: Weak<LoopInner>,
}

impl WatcherInner {
    fn interest(&self) -> Interest {
        let mut interest = Interest::NONE;
        if !self.readable.is_empty() {
            interest |= Interest::READABLE;
        }
        if !self.writable.is_empty() {
            interest |= Interest::WRITABLE;
        }
        if !self.exception.is_empty() {
            interest |= Interest::EXCEPTION;
        }
        interest
    }
}

impl FileDescWatchable for WatcherInner {
    fn fds(&self, set: &mut FdSet) -> bool {
        let Some(fd) = self.fd.get() else {
            return false;
        };
        let interest = self.interest();
        if interest.is_empty() {
            return false;
        }
        set.insert(fd, interest);
        true
    }

    fn on_select(&self, set: &FdSet) -> usize {
        let Some(fd) = self.fd.get() else {
            return 0;
        };
        let ready = set.ready(fd);
        if ready.is_empty() {
            return 0;
        }
        log::trace!("fd {fd} ready: {ready:?}");

        if ready.is_exception() {
            self.exception.emit();
        }
        if ready.is_readable() {
            self.readable.emit();
        }
        if ready.is_writable() {
            self.writable.emit();
        }
        1
    }
}

/// Readable, writable and exceptional-condition callbacks for one
/// descriptor.
///
/// The watcher is polled while it has a descriptor and is enabled, and only
/// for the conditions that have at least one callback connected. Clones
/// share the same watcher; dropping the last one stops the watching.
#[derive(Clone)]
pub struct FileDescWatcher {
    inner: Rc<WatcherInner>,
}

impl FileDescWatcher {
    /// Create a watcher on `app`, enabled right away if `fd` is given.
    pub fn new(app: &AppLoop, fd: Option<RawFd>) -> Self {
        let watcher = Self {
            inner: Rc::new(WatcherInner {
                fd: Cell::new(None),
                readable: Signal::new(),
                writable: Signal::new(),
                exception: Signal::new(),
                reactor: app.downgrade(),
            }),
        };
        watcher.set_fd(fd);
        watcher
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.inner.fd.get()
    }

    /// Watch a different descriptor. Setting one enables the watcher and
    /// clearing it disables the watcher.
    pub fn set_fd(&self, fd: Option<RawFd>) {
        let old = self.inner.fd.replace(fd);
        match (old, fd) {
            (None, Some(_)) => self.enable(),
            (Some(_), None) => self.disable(),
            _ => {}
        }
    }

    /// Add to the reactor's active set. Does nothing without a descriptor.
    pub fn enable(&self) {
        if self.inner.fd.get().is_none() {
            return;
        }
        if let Some(reactor) = self.inner.reactor.upgrade() {
            reactor.activate(self.as_watchable());
        }
    }

    /// Remove from the reactor's active set, keeping the descriptor.
    pub fn disable(&self) {
        if let Some(reactor) = self.inner.reactor.upgrade() {
            reactor.deactivate(&self.as_watchable());
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .reactor
            .upgrade()
            .is_some_and(|reactor| reactor.is_active(&self.as_watchable()))
    }

    pub fn readable(&self) -> &Signal {
        &self.inner.readable
    }

    pub fn writable(&self) -> &Signal {
        &self.inner.writable
    }

    pub fn exception(&self) -> &Signal {
        &self.inner.exception
    }

    fn as_watchable(&self) -> Weak<dyn FileDescWatchable> {
        let weak: Weak<WatcherInner> = Rc::downgrade(&self.inner);
        weak
    }
}

impl Drop for FileDescWatcher {
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) == 1 {
            self.disable();
        }
    }
}

impl fmt::Debug for FileDescWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescWatcher")
            .field("fd", &self.fd())
            .field("interest", &self.inner.interest())
            .finish()
    }
}
