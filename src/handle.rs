//! Reference-counted ownership
//!
//! [`RefCount`] is a plain intrusive counter for objects that manage their own
//! lifetime. [`Handle`] is the nullable shared-ownership pointer everything
//! else is held through: it is an `Option<Arc<T>>` that reports a
//! [`Error::NullReference`] naming the caller instead of panicking when empty,
//! and supports a checked downcast that yields an empty handle on a type
//! mismatch.

use crate::error::{Error, Result};
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

/// Intrusive reference count. Starts at zero.
///
/// Not thread-safe; embed it in objects confined to one thread.
#[derive(Debug, Default)]
pub struct RefCount {
    refs: Cell<u32>,
}

impl RefCount {
    pub fn new() -> Self {
        Self { refs: Cell::new(0) }
    }

    /// Increment the count.
    pub fn ref_(&self) {
        self.refs.set(self.refs.get() + 1);
    }

    /// Decrement the count, returning `true` once it reaches zero.
    pub fn deref(&self) -> bool {
        let refs = self.refs.get().saturating_sub(1);
        self.refs.set(refs);
        refs == 0
    }

    pub fn refs(&self) -> u32 {
        self.refs.get()
    }
}

impl Clone for RefCount {
    /// A copied object starts with its own, zeroed count.
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Nullable shared-ownership handle.
pub struct Handle<T: ?Sized> {
    inner: Option<Arc<T>>,
}

impl<T> Handle<T> {
    /// Take ownership of `value`; the count starts at one.
    pub fn new(value: T) -> Self {
        Self {
            inner: Some(Arc::new(value)),
        }
    }
}

impl<T: ?Sized> Handle<T> {
    /// An empty handle.
    pub fn null() -> Self {
        Self { inner: None }
    }

    pub fn from_arc(arc: Arc<T>) -> Self {
        Self { inner: Some(arc) }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Number of handles sharing the object, 0 for an empty handle.
    pub fn refs(&self) -> usize {
        self.inner.as_ref().map(Arc::strong_count).unwrap_or(0)
    }

    /// Borrow the object. `operation` names the caller in the error raised
    /// when the handle is empty.
    pub fn get(&self, operation: &'static str) -> Result<&T> {
        self.inner
            .as_deref()
            .ok_or_else(|| Error::null_reference(operation))
    }

    pub fn as_arc(&self) -> Option<&Arc<T>> {
        self.inner.as_ref()
    }

    pub fn into_arc(self) -> Option<Arc<T>> {
        self.inner
    }

    /// Release this handle's reference, leaving it empty.
    pub fn reset(&mut self) {
        self.inner = None;
    }

    /// Point at the same object as `other`, releasing the previous one.
    pub fn assign(&mut self, other: &Handle<T>) {
        self.inner = other.inner.clone();
    }

    /// Whether both handles refer to the same object (two empty handles are
    /// equal).
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Any + Send + Sync> Handle<T> {
    /// Erase the concrete type so the handle can later be downcast.
    pub fn upcast(self) -> Handle<dyn Any + Send + Sync> {
        Handle {
            inner: self.inner.map(|arc| arc as Arc<dyn Any + Send + Sync>),
        }
    }
}

impl Handle<dyn Any + Send + Sync> {
    /// Checked downcast: a handle sharing ownership of the object if its
    /// runtime type is `U`, otherwise an empty handle.
    pub fn downcast<U: Any + Send + Sync>(&self) -> Handle<U> {
        match &self.inner {
            Some(arc) => match Arc::clone(arc).downcast::<U>() {
                Ok(typed) => Handle::from_arc(typed),
                Err(_) => Handle::null(),
            },
            None => Handle::null(),
        }
    }

    /// Whether the object's runtime type is `U`.
    pub fn is<U: Any>(&self) -> bool {
        self.inner.as_ref().map(|arc| arc.is::<U>()).unwrap_or(false)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Arc<T>> for Handle<T> {
    fn from(arc: Arc<T>) -> Self {
        Self::from_arc(arc)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(value) => f.debug_tuple("Handle").field(&&**value).finish(),
            None => f.write_str("Handle(null)"),
        }
    }
}
