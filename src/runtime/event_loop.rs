//! Descriptor readiness polling
//!
//! A thin layer over `poll(2)` that keeps select(2) semantics for the
//! reactor: a descriptor is reported readable on hang-up or error, and
//! exceptional on priority data or an invalid descriptor.

use crate::error::Result;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Interest flags for descriptor readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(pub u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(0b0001);
    pub const WRITABLE: Interest = Interest(0b0010);
    pub const EXCEPTION: Interest = Interest(0b0100);

    pub fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn is_exception(&self) -> bool {
        self.0 & Self::EXCEPTION.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn to_poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.is_readable() {
            events |= libc::POLLIN;
        }
        if self.is_writable() {
            events |= libc::POLLOUT;
        }
        if self.is_exception() {
            events |= libc::POLLPRI;
        }
        events
    }

    fn from_poll_events(revents: libc::c_short) -> Interest {
        let mut interest = Interest::NONE;
        if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            interest |= Interest::READABLE;
        }
        if revents & (libc::POLLOUT | libc::POLLERR) != 0 {
            interest |= Interest::WRITABLE;
        }
        if revents & (libc::POLLPRI | libc::POLLNVAL) != 0 {
            interest |= Interest::EXCEPTION;
        }
        interest
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Interest {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Interest(self.0 & rhs.0)
    }
}

impl std::ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Descriptors of interest for one polling pass, and what came back ready.
#[derive(Default)]
pub struct FdSet {
    fds: Vec<libc::pollfd>,
    interest: Vec<Interest>,
    index: HashMap<RawFd, usize>,
}

impl FdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add interest in `fd`, merging with any interest already recorded.
    pub fn insert(&mut self, fd: RawFd, interest: Interest) {
        match self.index.get(&fd) {
            Some(&i) => {
                self.interest[i] |= interest;
                self.fds[i].events = self.interest[i].to_poll_events();
            }
            None => {
                self.index.insert(fd, self.fds.len());
                self.fds.push(libc::pollfd {
                    fd,
                    events: interest.to_poll_events(),
                    revents: 0,
                });
                self.interest.push(interest);
            }
        }
    }

    /// Readiness of `fd` from the last poll, limited to what was asked for.
    pub fn ready(&self, fd: RawFd) -> Interest {
        self.index
            .get(&fd)
            .map(|&i| Interest::from_poll_events(self.fds[i].revents) & self.interest[i])
            .unwrap_or(Interest::NONE)
    }

    /// Interest recorded for `fd`.
    pub fn interest(&self, fd: RawFd) -> Interest {
        self.index
            .get(&fd)
            .map(|&i| self.interest[i])
            .unwrap_or(Interest::NONE)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.index.contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Forget every descriptor.
    pub fn clear(&mut self) {
        self.fds.clear();
        self.interest.clear();
        self.index.clear();
    }

    /// Forget the results of the last poll, keeping the interest.
    pub fn clear_ready(&mut self) {
        for pfd in &mut self.fds {
            pfd.revents = 0;
        }
    }
}

impl std::fmt::Debug for FdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.fds.iter().zip(&self.interest).map(|(p, i)| (p.fd, *i)))
            .finish()
    }
}

/// Wait up to `timeout` for any descriptor in `set` to become ready.
///
/// Returns the number of ready descriptors. An interrupted call reports zero.
/// The timeout is rounded up to whole milliseconds so a short wait never
/// turns into a busy spin.
pub fn poll(set: &mut FdSet, timeout: Duration) -> Result<usize> {
    set.clear_ready();
    let timeout_ms = timeout_millis(timeout);

    let count = unsafe {
        libc::poll(
            set.fds.as_mut_ptr(),
            set.fds.len() as libc::nfds_t,
            timeout_ms,
        )
    };

    if count < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err.into());
    }

    Ok(count as usize)
}

fn timeout_millis(timeout: Duration) -> libc::c_int {
    let mut ms = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
