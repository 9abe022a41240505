//! Blocking priority queue

use super::{has_items, lock_when, lock_when_timeout, when_ready, when_ready_timeout, Guarded};
use crate::sync::{Mutex, WaitCondition};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Blocking queue popping the highest priority first. Items of equal
/// priority come out in the order they were pushed.
///
/// ```
/// use finagle::queue::PriorityQueue;
///
/// let q = PriorityQueue::new();
/// q.push("low", 1);
/// q.push("high", 3);
/// q.push("mid", 2);
/// assert_eq!(q.pop(), "high");
/// assert_eq!(q.pop(), "mid");
/// assert_eq!(q.pop(), "low");
/// ```
pub struct PriorityQueue<T, P = i64> {
    // Sorted by descending priority.
    items: Guarded<VecDeque<(P, T)>>,
    not_empty: WaitCondition,
}

impl<T, P: PartialOrd> PriorityQueue<T, P> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(RefCell::new(VecDeque::new())),
            not_empty: WaitCondition::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().borrow().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().borrow_mut().clear();
    }

    /// Insert behind every queued item of the same or higher priority and
    /// wake one waiting consumer.
    pub fn push(&self, item: T, priority: P) {
        let items = self.items.lock();
        {
            let mut items = items.borrow_mut();
            let at = items.partition_point(|(queued, _)| ranks_before(queued, &priority));
            items.insert(at, (priority, item));
        }
        self.not_empty.signal_one();
    }

    /// Remove the highest-priority item, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        self.pop_entry().1
    }

    /// Like [`pop`](Self::pop) but also returns the item's priority.
    pub fn pop_entry(&self) -> (P, T) {
        when_ready(&self.items, &self.not_empty, VecDeque::pop_front)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().borrow_mut().pop_front().map(|(_, item)| item)
    }

    /// Remove the highest-priority item, waiting up to `timeout` for one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        when_ready_timeout(&self.items, &self.not_empty, timeout, VecDeque::pop_front)
            .map(|(_, item)| item)
    }

    /// Priority of the item [`pop`](Self::pop) would return next.
    pub fn peek_priority(&self) -> Option<P>
    where
        P: Clone,
    {
        self.items.lock().borrow().front().map(|(p, _)| p.clone())
    }

    /// Call `f` with the guard held once the queue is non-empty, blocking
    /// until then. `f` may call back into the queue.
    pub fn when_not_empty<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _items = lock_when(&self.items, &self.not_empty, has_items);
        f(self)
    }

    /// Call `f` if the queue is, or within `timeout` becomes, non-empty.
    pub fn if_not_empty<R>(&self, f: impl FnOnce(&Self) -> R, timeout: Duration) -> Option<R> {
        let _items = lock_when_timeout(&self.items, &self.not_empty, timeout, has_items)?;
        Some(f(self))
    }
}

/// Whether an incoming item of priority `incoming` belongs behind one of
/// priority `queued`. Keys not comparable with themselves (NaN) rank below
/// every other key and keep arrival order among themselves, which keeps the
/// predicate monotone over the sorted entries.
fn ranks_before<P: PartialOrd>(queued: &P, incoming: &P) -> bool {
    match (is_ordered(queued), is_ordered(incoming)) {
        (_, false) => true,
        (false, true) => false,
        (true, true) => !matches!(queued.partial_cmp(incoming), Some(Ordering::Less)),
    }
}

fn is_ordered<P: PartialOrd>(p: &P) -> bool {
    p.partial_cmp(p).is_some()
}

impl<T, P: PartialOrd> Default for PriorityQueue<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P> fmt::Debug for PriorityQueue<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.items.lock().borrow().len())
            .finish()
    }
}
