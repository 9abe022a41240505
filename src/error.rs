//! Crate-wide error type
//!
//! Three kinds of failure cross the public API:
//! - usage errors on the blocking primitives (fatal programmer errors)
//! - dereferencing an empty [`Handle`](crate::handle::Handle)
//! - readiness polling failures inside the reactor (logged, never fatal)
//!
//! Timeouts are not errors; timed operations return `bool` or `Option`.

use std::io;
use thiserror::Error;

/// Errors raised by the reactor and synchronization primitives.
#[derive(Debug, Error)]
pub enum Error {
    /// A primitive was used in a way its contract forbids, e.g. unlocking a
    /// mutex the calling thread does not own. `code` is the errno the
    /// equivalent POSIX call reports.
    #[error("usage error in {operation}: {} (errno {code})", describe_errno(.code))]
    Usage {
        operation: &'static str,
        code: i32,
    },

    /// An empty handle was dereferenced.
    #[error("null reference in {operation}")]
    NullReference { operation: &'static str },

    /// The readiness syscall failed.
    #[error("poll failed: {0}")]
    Poll(#[from] io::Error),
}

/// Result type for reactor and synchronization operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn usage(operation: &'static str, code: i32) -> Self {
        Error::Usage { operation, code }
    }

    pub(crate) fn null_reference(operation: &'static str) -> Self {
        Error::NullReference { operation }
    }

    /// The errno carried by a usage error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Usage { code, .. } => Some(*code),
            Error::Poll(err) => err.raw_os_error(),
            Error::NullReference { .. } => None,
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage { .. })
    }

    pub fn is_null_reference(&self) -> bool {
        matches!(self, Error::NullReference { .. })
    }
}

fn describe_errno(code: &i32) -> String {
    io::Error::from_raw_os_error(*code).to_string()
}
