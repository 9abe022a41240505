//! Cooperative, priority-ranked exclusion
//!
//! A [`PriorityMutex`] keeps every registered [`PriorityLock`] in descending
//! priority order (ties keep registration order). The head of that list is
//! the owner. Nothing is suspended: when a higher-priority lock arrives the
//! displaced owner is only told so through its `on_lose` signal and is
//! expected to wind down its critical section; when the owner unlocks, the
//! next lock in line hears `on_gain`.

use crate::signal::SyncSignal;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`PriorityLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub u64);

struct LockShared {
    id: LockId,
    priority: AtomicU32,
    gain: SyncSignal,
    lose: SyncSignal,
}

impl LockShared {
    fn priority(&self) -> u32 {
        self.priority.load(Ordering::Acquire)
    }
}

/// Arbitrates one cooperative resource between prioritized locks.
#[derive(Default)]
pub struct PriorityMutex {
    locks: Mutex<Vec<Arc<LockShared>>>,
}

impl PriorityMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest-priority registered lock, if any.
    pub fn owner(&self) -> Option<LockId> {
        self.locks.lock().first().map(|l| l.id)
    }

    /// Number of registered locks.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    pub fn contains(&self, id: LockId) -> bool {
        self.locks.lock().iter().any(|l| l.id == id)
    }

    /// Registered locks, owner first.
    pub fn queue(&self) -> Vec<LockId> {
        self.locks.lock().iter().map(|l| l.id).collect()
    }

    /// Register `lock`, returning whether it now owns the mutex.
    ///
    /// If this displaces the previous owner, that owner's `on_lose` fires.
    /// Registering an already registered lock changes nothing.
    pub fn lock(&self, lock: &PriorityLock) -> bool {
        if !lock.is_bound_to(self) {
            log::warn!(
                "PriorityLock {:?} is not bound to this PriorityMutex; ignoring lock",
                lock.id()
            );
            return false;
        }

        let entry = &lock.shared;
        let (old_owner, new_owner) = {
            let mut locks = self.locks.lock();
            let old_owner = locks.first().cloned();

            if !locks.iter().any(|l| l.id == entry.id) {
                let priority = entry.priority();
                let at = locks
                    .iter()
                    .position(|l| l.priority() < priority)
                    .unwrap_or(locks.len());
                locks.insert(at, Arc::clone(entry));
            }

            (old_owner, locks.first().cloned())
        };

        if let (Some(old), Some(new)) = (&old_owner, &new_owner) {
            if old.id != new.id {
                log::trace!("priority lock {:?} displaced by {:?}", old.id, new.id);
                old.lose.emit();
            }
        }

        new_owner.map(|o| o.id == entry.id).unwrap_or(false)
    }

    /// Deregister `lock`.
    ///
    /// If it was the owner its `on_lose` fires; the lock that takes over then
    /// hears `on_gain`.
    pub fn unlock(&self, lock: &PriorityLock) {
        self.remove(&lock.shared);
    }

    fn remove(&self, entry: &Arc<LockShared>) {
        let (old_owner, new_owner) = {
            let mut locks = self.locks.lock();
            let Some(at) = locks.iter().position(|l| l.id == entry.id) else {
                return;
            };
            let old_owner = locks.first().cloned();
            locks.remove(at);
            (old_owner, locks.first().cloned())
        };

        if old_owner.as_ref().map(|o| o.id) == Some(entry.id) {
            entry.lose.emit();
        }
        if let Some(new) = new_owner {
            if old_owner.map(|o| o.id) != Some(new.id) {
                log::trace!("priority lock {:?} gained ownership", new.id);
                new.gain.emit();
            }
        }
    }
}

impl fmt::Debug for PriorityMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locks = self.locks.lock();
        f.debug_list()
            .entries(locks.iter().map(|l| (l.id, l.priority())))
            .finish()
    }
}

/// One contender for a [`PriorityMutex`]. Unlocks itself when dropped.
pub struct PriorityLock {
    shared: Arc<LockShared>,
    mutex: Option<Arc<PriorityMutex>>,
}

impl PriorityLock {
    pub fn new(mutex: Option<Arc<PriorityMutex>>, priority: u32) -> Self {
        Self {
            shared: Arc::new(LockShared {
                id: LockId(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed)),
                priority: AtomicU32::new(priority),
                gain: SyncSignal::new(),
                lose: SyncSignal::new(),
            }),
            mutex,
        }
    }

    pub fn id(&self) -> LockId {
        self.shared.id
    }

    pub fn priority(&self) -> u32 {
        self.shared.priority()
    }

    /// Change the priority. The lock is unlocked first and must be locked
    /// again to take its new place.
    pub fn set_priority(&mut self, priority: u32) {
        self.unlock();
        self.shared.priority.store(priority, Ordering::Release);
    }

    pub fn mutex(&self) -> Option<&Arc<PriorityMutex>> {
        self.mutex.as_ref()
    }

    /// Rebind to another mutex (or none), unlocking from the current one.
    pub fn set_mutex(&mut self, mutex: Option<Arc<PriorityMutex>>) {
        self.unlock();
        self.mutex = mutex;
    }

    /// Register with the bound mutex; `true` if this lock is now the owner.
    /// Always `false` without a mutex.
    pub fn lock(&self) -> bool {
        match &self.mutex {
            Some(mutex) => mutex.lock(self),
            None => false,
        }
    }

    pub fn unlock(&self) {
        if let Some(mutex) = &self.mutex {
            mutex.unlock(self);
        }
    }

    /// Whether this lock currently owns its mutex.
    pub fn is_locked(&self) -> bool {
        self.mutex
            .as_ref()
            .map(|m| m.owner() == Some(self.id()))
            .unwrap_or(false)
    }

    /// Fired when this lock becomes the owner after the previous owner
    /// unlocked.
    pub fn on_gain(&self) -> &SyncSignal {
        &self.shared.gain
    }

    /// Fired when this lock stops being the owner.
    pub fn on_lose(&self) -> &SyncSignal {
        &self.shared.lose
    }

    fn is_bound_to(&self, mutex: &PriorityMutex) -> bool {
        self.mutex
            .as_ref()
            .map(|m| std::ptr::eq(Arc::as_ptr(m), mutex))
            .unwrap_or(false)
    }
}

impl Drop for PriorityLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl PartialEq for PriorityLock {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for PriorityLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityLock")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("bound", &self.mutex.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(signal: &SyncSignal) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        signal.connect(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[test]
    fn test_highest_priority_owns() {
        let mutex = Arc::new(PriorityMutex::new());
        let five = PriorityLock::new(Some(Arc::clone(&mutex)), 5);
        let ten = PriorityLock::new(Some(Arc::clone(&mutex)), 10);
        let one = PriorityLock::new(Some(Arc::clone(&mutex)), 1);

        let five_gain = counter(five.on_gain());
        let five_lose = counter(five.on_lose());

        assert!(five.lock());
        assert!(ten.lock());
        assert!(!one.lock());

        assert_eq!(mutex.owner(), Some(ten.id()));
        assert_eq!(mutex.queue(), vec![ten.id(), five.id(), one.id()]);
        assert_eq!(five_lose.load(Ordering::SeqCst), 1);

        ten.unlock();
        assert_eq!(mutex.owner(), Some(five.id()));
        assert!(five.is_locked());
        assert_eq!(five_gain.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_equal_priority_keeps_arrival_order() {
        let mutex = Arc::new(PriorityMutex::new());
        let first = PriorityLock::new(Some(Arc::clone(&mutex)), 3);
        let second = PriorityLock::new(Some(Arc::clone(&mutex)), 3);
        let lose = counter(first.on_lose());

        assert!(first.lock());
        assert!(!second.lock());
        assert_eq!(mutex.owner(), Some(first.id()));
        assert_eq!(lose.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relock_is_idempotent() {
        let mutex = Arc::new(PriorityMutex::new());
        let lock = PriorityLock::new(Some(Arc::clone(&mutex)), 1);
        assert!(lock.lock());
        assert!(lock.lock());
        assert_eq!(mutex.len(), 1);
    }

    #[test]
    fn test_unlocking_owner_fires_lose_then_gain() {
        let mutex = Arc::new(PriorityMutex::new());
        let high = PriorityLock::new(Some(Arc::clone(&mutex)), 9);
        let low = PriorityLock::new(Some(Arc::clone(&mutex)), 2);
        let high_lose = counter(high.on_lose());
        let low_gain = counter(low.on_gain());

        high.lock();
        low.lock();
        high.unlock();

        assert_eq!(high_lose.load(Ordering::SeqCst), 1);
        assert_eq!(low_gain.load(Ordering::SeqCst), 1);

        // Unlocking a non-owner is silent.
        let low_lose = counter(low.on_lose());
        let other = PriorityLock::new(Some(Arc::clone(&mutex)), 1);
        other.lock();
        other.unlock();
        assert_eq!(low_lose.load(Ordering::SeqCst), 0);
        assert_eq!(low_gain.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unlocks() {
        let mutex = Arc::new(PriorityMutex::new());
        let survivor = PriorityLock::new(Some(Arc::clone(&mutex)), 1);
        let gain = counter(survivor.on_gain());
        survivor.lock();
        {
            let temp = PriorityLock::new(Some(Arc::clone(&mutex)), 7);
            temp.lock();
            assert!(!survivor.is_locked());
        }
        assert!(survivor.is_locked());
        assert_eq!(gain.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_priority_unlocks() {
        let mutex = Arc::new(PriorityMutex::new());
        let mut lock = PriorityLock::new(Some(Arc::clone(&mutex)), 1);
        lock.lock();
        lock.set_priority(4);
        assert!(mutex.is_empty());
        assert_eq!(lock.priority(), 4);
    }

    #[test]
    fn test_unbound_lock() {
        let mutex = PriorityMutex::new();
        let mut lock = PriorityLock::new(None, 1);
        assert!(!lock.lock());
        assert!(!lock.is_locked());
        assert!(!mutex.lock(&lock));

        let shared = Arc::new(mutex);
        lock.set_mutex(Some(Arc::clone(&shared)));
        assert!(lock.lock());
    }

    #[test]
    fn test_callback_may_reenter_mutex() {
        let mutex = Arc::new(PriorityMutex::new());
        let low = PriorityLock::new(Some(Arc::clone(&mutex)), 1);
        let high = PriorityLock::new(Some(Arc::clone(&mutex)), 2);

        let seen = Arc::new(Mutex::new(None));
        {
            let mutex = Arc::clone(&mutex);
            let seen = Arc::clone(&seen);
            low.on_lose().connect(move || *seen.lock() = mutex.owner());
        }

        low.lock();
        high.lock();
        assert_eq!(*seen.lock(), Some(high.id()));
    }
}
