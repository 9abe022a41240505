//! Bounded blocking FIFO

use super::{has_items, lock_when, lock_when_timeout, when_ready, when_ready_timeout, Queue};
use crate::config::QueueConfig;
use crate::sync::WaitCondition;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// FIFO holding at most `capacity` items. Pushes block while full, pops
/// block while empty.
///
/// ```
/// use finagle::queue::SizedQueue;
/// use std::time::Duration;
///
/// let q = SizedQueue::new(1);
/// q.push("a");
/// assert_eq!(q.try_push("b", Duration::ZERO), Err("b"));
/// assert_eq!(q.pop(), "a");
/// ```
pub struct SizedQueue<T> {
    queue: Queue<T>,
    capacity: AtomicUsize,
    not_full: WaitCondition,
}

impl<T> SizedQueue<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Queue::new(),
            capacity: AtomicUsize::new(clamp_capacity(capacity)),
            not_full: WaitCondition::new(),
        }
    }

    /// Bounded by the configured `default_capacity`.
    pub fn with_config(config: &QueueConfig) -> Self {
        Self::new(config.default_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Change the bound and wake every blocked producer so it can recheck.
    /// Items already queued beyond a lowered bound stay queued.
    pub fn set_capacity(&self, capacity: usize) {
        let _items = self.queue.items.lock();
        self.capacity
            .store(clamp_capacity(capacity), Ordering::Release);
        self.not_full.signal_all();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity()
    }

    /// Discard every queued item and wake blocked producers.
    pub fn clear(&self) {
        let items = self.queue.items.lock();
        items.borrow_mut().clear();
        self.not_full.signal_all();
    }

    /// Append at the tail, blocking while the queue is full.
    pub fn push(&self, item: T) {
        self.push_back(item);
    }

    pub fn push_back(&self, item: T) {
        self.insert(item, VecDeque::push_back);
    }

    /// Put an item at the head, blocking while the queue is full.
    pub fn push_front(&self, item: T) {
        self.insert(item, VecDeque::push_front);
    }

    /// Append at the tail if room frees up within `timeout`. The item comes
    /// back in `Err` if the queue stayed full.
    pub fn try_push(&self, item: T, timeout: Duration) -> Result<(), T> {
        let capacity = &self.capacity;
        let mut slot = Some(item);
        let pushed = when_ready_timeout(&self.queue.items, &self.not_full, timeout, |items| {
            if items.len() >= capacity.load(Ordering::Acquire) {
                return None;
            }
            items.extend(slot.take());
            self.queue.not_empty.signal_one();
            Some(())
        });
        match pushed {
            Some(()) => Ok(()),
            None => slot.map_or(Ok(()), Err),
        }
    }

    /// Remove the head, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        self.pop_front()
    }

    pub fn pop_front(&self) -> T {
        self.take(VecDeque::pop_front)
    }

    /// Remove the tail, blocking while the queue is empty.
    pub fn pop_back(&self) -> T {
        self.take(VecDeque::pop_back)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.try_pop_front()
    }

    pub fn try_pop_front(&self) -> Option<T> {
        self.take_timeout(Duration::ZERO, VecDeque::pop_front)
    }

    pub fn try_pop_back(&self) -> Option<T> {
        self.take_timeout(Duration::ZERO, VecDeque::pop_back)
    }

    /// Remove the head, waiting up to `timeout` for one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.pop_front_timeout(timeout)
    }

    pub fn pop_front_timeout(&self, timeout: Duration) -> Option<T> {
        self.take_timeout(timeout, VecDeque::pop_front)
    }

    pub fn pop_back_timeout(&self, timeout: Duration) -> Option<T> {
        self.take_timeout(timeout, VecDeque::pop_back)
    }

    /// Call `f` with the guard held once the queue has room, blocking until
    /// then. Pushes made by `f` wake consumers as usual; a push past the
    /// bound from inside `f` never returns, use
    /// [`try_push`](Self::try_push) there.
    pub fn when_not_full<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _items = lock_when(&self.queue.items, &self.not_full, |items: &VecDeque<T>| {
            items.len() < self.capacity()
        });
        f(self)
    }

    /// Call `f` if the queue has, or within `timeout` gains, room.
    pub fn if_not_full<R>(&self, f: impl FnOnce(&Self) -> R, timeout: Duration) -> Option<R> {
        let _items = lock_when_timeout(
            &self.queue.items,
            &self.not_full,
            timeout,
            |items: &VecDeque<T>| items.len() < self.capacity(),
        )?;
        Some(f(self))
    }

    /// Call `f` with the guard held once the queue is non-empty, blocking
    /// until then. Pops made by `f` wake producers as usual.
    pub fn when_not_empty<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _items = lock_when(&self.queue.items, &self.queue.not_empty, has_items);
        f(self)
    }

    pub fn if_not_empty<R>(&self, f: impl FnOnce(&Self) -> R, timeout: Duration) -> Option<R> {
        let _items =
            lock_when_timeout(&self.queue.items, &self.queue.not_empty, timeout, has_items)?;
        Some(f(self))
    }

    fn insert(&self, item: T, put: fn(&mut VecDeque<T>, T)) {
        let capacity = &self.capacity;
        let mut slot = Some(item);
        when_ready(&self.queue.items, &self.not_full, |items| {
            if items.len() >= capacity.load(Ordering::Acquire) {
                return None;
            }
            let item = slot.take()?;
            put(items, item);
            self.queue.not_empty.signal_one();
            Some(())
        });
    }

    fn take(&self, remove: fn(&mut VecDeque<T>) -> Option<T>) -> T {
        when_ready(&self.queue.items, &self.queue.not_empty, |items| {
            let item = remove(items)?;
            self.room_freed(items.len());
            Some(item)
        })
    }

    fn take_timeout(
        &self,
        timeout: Duration,
        remove: fn(&mut VecDeque<T>) -> Option<T>,
    ) -> Option<T> {
        when_ready_timeout(&self.queue.items, &self.queue.not_empty, timeout, |items| {
            let item = remove(items)?;
            self.room_freed(items.len());
            Some(item)
        })
    }

    // Called under the guard after a removal.
    fn room_freed(&self, len: usize) {
        if len < self.capacity() {
            self.not_full.signal_one();
        }
    }
}

/// Uses the built-in `default_capacity`; see
/// [`with_config`](SizedQueue::with_config) for a loaded `finagle.toml`.
impl<T> Default for SizedQueue<T> {
    fn default() -> Self {
        Self::new(QueueConfig::default().default_capacity)
    }
}

impl<T> fmt::Debug for SizedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn clamp_capacity(capacity: usize) -> usize {
    if capacity == 0 {
        log::warn!("SizedQueue capacity 0 raised to 1");
        1
    } else {
        capacity
    }
}
