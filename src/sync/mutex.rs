//! Recursive mutex with a scoped lock
//!
//! The owning thread may re-enter any number of times and must release
//! exactly as many times. Ownership is tracked explicitly so that misuse
//! (releasing an unlocked mutex, releasing from a foreign thread, dropping a
//! locked mutex) is reported instead of being undefined.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex as StateLock, MutexGuard};
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr;
use std::thread::{self, ThreadId};

/// Ownership record, plus the sleeper bookkeeping of a
/// [`WaitCondition`](super::WaitCondition) built on the same mutex. Both live
/// under one state lock so a waiter can give up ownership and start sleeping
/// atomically.
///
/// `wakeups` are single-waiter tokens. `broadcasts` is an epoch bumped by
/// every broadcast; a sleeper that saw an older epoch on entry is woken
/// without spending a token.
#[derive(Debug, Default)]
pub(crate) struct RawState {
    pub(crate) owner: Option<ThreadId>,
    pub(crate) depth: usize,
    pub(crate) sleepers: usize,
    pub(crate) wakeups: usize,
    pub(crate) broadcasts: u64,
}

pub(crate) struct RawMutex {
    pub(crate) state: StateLock<RawState>,
    released: Condvar,
}

impl RawMutex {
    fn new() -> Self {
        Self {
            state: StateLock::new(RawState::default()),
            released: Condvar::new(),
        }
    }

    /// Park on the state lock until no thread other than `me` owns the mutex.
    pub(crate) fn wait_unowned(&self, state: &mut MutexGuard<'_, RawState>, me: ThreadId) {
        while matches!(state.owner, Some(owner) if owner != me) {
            self.released.wait(state);
        }
    }

    fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        self.wait_unowned(&mut state, me);
        state.owner = Some(me);
        state.depth += 1;
    }

    fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner != me => false,
            _ => {
                state.owner = Some(me);
                state.depth += 1;
                true
            }
        }
    }

    fn release(&self, operation: &'static str) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(Error::usage(operation, libc::EPERM));
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            // Signalers park on the same condvar without taking ownership,
            // so wake everyone.
            self.released.notify_all();
        }
        Ok(())
    }

    /// Drop every level of ownership `me` holds, returning the depth to
    /// restore later (0 when `me` held nothing).
    pub(crate) fn release_all(&self, state: &mut MutexGuard<'_, RawState>, me: ThreadId) -> usize {
        if state.owner != Some(me) {
            return 0;
        }
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.released.notify_all();
        depth
    }

    /// Re-take ownership at `depth` levels (no-op for 0).
    pub(crate) fn restore(&self, state: &mut MutexGuard<'_, RawState>, me: ThreadId, depth: usize) {
        if depth == 0 {
            return;
        }
        self.wait_unowned(state, me);
        state.owner = Some(me);
        state.depth = depth;
    }
}

/// Recursive mutual-exclusion primitive, optionally guarding a value.
///
/// Because the owner may hold several [`Lock`]s at once, the guarded value is
/// only ever handed out as `&T`; use a `Cell`/`RefCell` inside for mutation.
///
/// ```
/// use finagle::sync::Mutex;
///
/// let guard = Mutex::new(());
/// {
///     let _outer = guard.lock();
///     let _inner = guard.lock(); // same thread, re-entry is fine
///     assert_eq!(guard.depth(), 2);
/// }
/// assert!(!guard.is_locked());
/// ```
pub struct Mutex<T: ?Sized = ()> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// Only the owning thread can reach `data`, and it only gets `&T`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex, returning the guarded value. Panics like dropping
    /// if the mutex is still acquired.
    pub fn into_inner(self) -> T {
        let mut this = ManuallyDrop::new(self);
        this.ensure_unlocked("Mutex::into_inner");
        // `this` is never used again and its destructor never runs.
        unsafe {
            ptr::drop_in_place(&mut this.raw);
            ptr::read(&this.data).into_inner()
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Lock, blocking while another thread owns the mutex. Must be paired
    /// with [`release`](Self::release).
    pub fn acquire(&self) {
        self.raw.acquire();
    }

    /// Lock without blocking; `false` if another thread owns the mutex.
    pub fn try_acquire(&self) -> bool {
        self.raw.try_acquire()
    }

    /// Undo one [`acquire`](Self::acquire).
    ///
    /// Fails with a usage error (`EPERM`) if the mutex is unlocked or owned by
    /// another thread.
    pub fn release(&self) -> Result<()> {
        self.raw.release("Mutex::release")
    }

    /// Lock for the lifetime of the returned guard.
    pub fn lock(&self) -> Lock<'_, T> {
        self.raw.acquire();
        Lock::new(self)
    }

    pub fn try_lock(&self) -> Option<Lock<'_, T>> {
        if self.raw.try_acquire() {
            Some(Lock::new(self))
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.state.lock().owner.is_some()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.raw.state.lock().owner == Some(thread::current().id())
    }

    /// Recursion depth of the current owner (0 when unlocked).
    pub fn depth(&self) -> usize {
        self.raw.state.lock().depth
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub(crate) fn raw(&self) -> &RawMutex {
        &self.raw
    }

    fn ensure_unlocked(&mut self, operation: &'static str) {
        let state = self.raw.state.get_mut();
        if state.owner.is_some() {
            let err = Error::usage(operation, libc::EBUSY);
            log::error!("{err} (depth {})", state.depth);
            if !thread::panicking() {
                panic!("{err}");
            }
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> Drop for Mutex<T> {
    fn drop(&mut self) {
        self.ensure_unlocked("Mutex::drop");
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.raw.state.lock();
        f.debug_struct("Mutex")
            .field("owner", &state.owner)
            .field("depth", &state.depth)
            .finish_non_exhaustive()
    }
}

/// Scoped ownership of a [`Mutex`]; released when dropped, including during
/// unwinding.
#[must_use = "the mutex is released as soon as the lock is dropped"]
pub struct Lock<'a, T: ?Sized = ()> {
    mutex: &'a Mutex<T>,
    // Ownership belongs to the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> Lock<'a, T> {
    fn new(mutex: &'a Mutex<T>) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    pub fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T: ?Sized> Deref for Lock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The current thread owns the mutex for as long as `self` lives.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.raw.release("Lock::drop") {
            log::error!("{err}");
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Lock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lock").field(&&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;

    #[test]
    fn test_recursive_acquire_release() {
        let m = Mutex::new(());
        for n in 1..=5 {
            m.acquire();
            assert_eq!(m.depth(), n);
        }
        assert!(m.is_owned_by_current_thread());

        for n in (0..5).rev() {
            m.release().unwrap();
            assert_eq!(m.depth(), n);
        }
        assert!(!m.is_locked());
    }

    #[test]
    fn test_release_unlocked_is_usage_error() {
        let m = Mutex::new(());
        let err = m.release().unwrap_err();
        assert!(err.is_usage());
        assert_eq!(err.code(), Some(libc::EPERM));
    }

    #[test]
    fn test_release_from_foreign_thread_fails() {
        let m = Arc::new(Mutex::new(()));
        m.acquire();

        let other = Arc::clone(&m);
        let err = std::thread::spawn(move || other.release().unwrap_err())
            .join()
            .unwrap();
        assert_eq!(err.code(), Some(libc::EPERM));

        assert_eq!(m.depth(), 1);
        m.release().unwrap();
    }

    #[test]
    fn test_other_thread_blocked_until_balanced() {
        let m = Arc::new(Mutex::new(()));
        m.acquire();
        m.acquire();

        let lockable_elsewhere = |m: &Arc<Mutex<()>>| {
            let m = Arc::clone(m);
            std::thread::spawn(move || {
                let got = m.try_acquire();
                if got {
                    m.release().unwrap();
                }
                got
            })
            .join()
            .unwrap()
        };

        assert!(!lockable_elsewhere(&m));
        m.release().unwrap();
        assert!(!lockable_elsewhere(&m));
        m.release().unwrap();
        assert!(lockable_elsewhere(&m));
    }

    #[test]
    fn test_lock_guard_releases_on_early_return() {
        fn early(m: &Mutex<Cell<u32>>) -> Option<u32> {
            let lock = m.lock();
            lock.set(lock.get() + 1);
            if lock.get() > 0 {
                return None;
            }
            Some(lock.get())
        }

        let m = Mutex::new(Cell::new(0));
        assert_eq!(early(&m), None);
        assert!(!m.is_locked());
        assert_eq!(m.lock().get(), 1);
    }

    #[test]
    fn test_lock_guard_releases_on_panic() {
        let m = Arc::new(Mutex::new(()));
        let inner = Arc::clone(&m);
        let result = std::thread::spawn(move || {
            let _lock = inner.lock();
            panic!("boom");
        })
        .join();
        assert!(result.is_err());
        assert!(!m.is_locked());
        assert!(m.try_acquire());
        m.release().unwrap();
    }

    #[test]
    fn test_try_lock_contended() {
        let m = Arc::new(Mutex::new(5u32));
        let lock = m.lock();
        assert_eq!(*lock, 5);

        let other = Arc::clone(&m);
        let got = std::thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!got);
        drop(lock);
    }

    #[test]
    fn test_into_inner() {
        let m = Mutex::new(vec![1, 2]);
        m.lock().len();
        assert_eq!(m.into_inner(), vec![1, 2]);
    }

    #[test]
    #[should_panic(expected = "Mutex::drop")]
    fn test_drop_locked_mutex_panics() {
        let m = Mutex::new(());
        m.acquire();
        drop(m);
    }
}
