//! Thread-safe blocking queues
//!
//! Every queue keeps its items behind a guard [`Mutex`] and parks consumers
//! on a "not empty" [`WaitCondition`] using the hand-off described in
//! [`sync::WaitCondition`](crate::sync::WaitCondition): take the condition's
//! lock, release the guard, sleep. A push therefore happens-before the pop
//! it wakes.
//!
//! - [`Queue`]: FIFO/LIFO deque
//! - [`PriorityQueue`]: highest priority first, arrival order among equals
//! - [`SizedQueue`]: bounded FIFO whose pushes block while full
//!
//! The `when_*`/`if_*` functors run with the guard held and receive the queue
//! itself, so a functor may call back into it (`len`, `try_pop_front`,
//! `push_back`, ...) as one atomic step. A call that has to block from inside
//! a functor never returns, since no other thread can change the queue.

mod priority;
mod sized;

pub use priority::PriorityQueue;
pub use sized::SizedQueue;

use crate::sync::{Lock, Mutex, WaitCondition};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

type Guarded<S> = Mutex<RefCell<S>>;

/// Run `attempt` under `guard` until it yields a value, sleeping on `cond`
/// between attempts.
fn when_ready<S, R>(
    guard: &Guarded<S>,
    cond: &WaitCondition,
    mut attempt: impl FnMut(&mut S) -> Option<R>,
) -> R {
    let mut state = guard.lock();
    loop {
        if let Some(out) = attempt(&mut *state.borrow_mut()) {
            return out;
        }
        cond.wait_with(state, None);
        state = guard.lock();
    }
}

/// Like [`when_ready`] but gives up once `timeout` has elapsed. A zero
/// timeout makes exactly one attempt.
fn when_ready_timeout<S, R>(
    guard: &Guarded<S>,
    cond: &WaitCondition,
    timeout: Duration,
    mut attempt: impl FnMut(&mut S) -> Option<R>,
) -> Option<R> {
    let deadline = Instant::now() + timeout;
    let mut state = guard.lock();
    loop {
        if let Some(out) = attempt(&mut *state.borrow_mut()) {
            return Some(out);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        cond.wait_with(state, Some(deadline - now));
        state = guard.lock();
    }
}

/// Take `guard` once `ready` holds, sleeping on `cond` between checks. The
/// state is only borrowed for each check, so the caller can re-enter the
/// queue while it holds the returned lock.
fn lock_when<'a, S>(
    guard: &'a Guarded<S>,
    cond: &WaitCondition,
    ready: impl Fn(&S) -> bool,
) -> Lock<'a, RefCell<S>> {
    let mut state = guard.lock();
    while !ready(&state.borrow()) {
        cond.wait_with(state, None);
        state = guard.lock();
    }
    state
}

fn lock_when_timeout<'a, S>(
    guard: &'a Guarded<S>,
    cond: &WaitCondition,
    timeout: Duration,
    ready: impl Fn(&S) -> bool,
) -> Option<Lock<'a, RefCell<S>>> {
    let deadline = Instant::now() + timeout;
    let mut state = guard.lock();
    loop {
        if ready(&state.borrow()) {
            return Some(state);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        cond.wait_with(state, Some(deadline - now));
        state = guard.lock();
    }
}

fn has_items<T>(items: &VecDeque<T>) -> bool {
    !items.is_empty()
}

/// Unbounded blocking deque.
///
/// ```
/// use finagle::queue::Queue;
///
/// let q = Queue::new();
/// q.push_back(1);
/// q.push_back(2);
/// q.push_front(0);
/// assert_eq!(q.pop_front(), 0);
/// assert_eq!(q.pop_back(), 2);
/// assert_eq!(q.len(), 1);
/// ```
pub struct Queue<T> {
    items: Guarded<VecDeque<T>>,
    not_empty: WaitCondition,
}

impl<T> Queue<T> {
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

    /// Discard every queued item.
    pub fn clear(&self) {
        self.items.lock().borrow_mut().clear();
    }

    /// Append at the tail and wake one waiting consumer.
    pub fn push_back(&self, item: T) {
        let items = self.items.lock();
        items.borrow_mut().push_back(item);
        self.not_empty.signal_one();
    }

    /// Put an item back at the head and wake one waiting consumer.
    pub fn push_front(&self, item: T) {
        let items = self.items.lock();
        items.borrow_mut().push_front(item);
        self.not_empty.signal_one();
    }

    /// Remove the head, blocking while the queue is empty.
    pub fn pop_front(&self) -> T {
        when_ready(&self.items, &self.not_empty, VecDeque::pop_front)
    }

    /// Remove the tail, blocking while the queue is empty.
    pub fn pop_back(&self) -> T {
        when_ready(&self.items, &self.not_empty, VecDeque::pop_back)
    }

    /// Remove the head if there is one, without blocking.
    pub fn try_pop_front(&self) -> Option<T> {
        self.items.lock().borrow_mut().pop_front()
    }

    pub fn try_pop_back(&self) -> Option<T> {
        self.items.lock().borrow_mut().pop_back()
    }

    /// Remove the head, waiting up to `timeout` for one to arrive.
    pub fn pop_front_timeout(&self, timeout: Duration) -> Option<T> {
        when_ready_timeout(&self.items, &self.not_empty, timeout, VecDeque::pop_front)
    }

    pub fn pop_back_timeout(&self, timeout: Duration) -> Option<T> {
        when_ready_timeout(&self.items, &self.not_empty, timeout, VecDeque::pop_back)
    }

    /// Call `f` with the guard held once the queue is non-empty, blocking
    /// until then.
    pub fn when_not_empty<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _items = lock_when(&self.items, &self.not_empty, has_items);
        f(self)
    }

    /// Call `f` with the guard held if the queue is, or within `timeout`
    /// becomes, non-empty. `None` if it stayed empty.
    pub fn if_not_empty<R>(&self, f: impl FnOnce(&Self) -> R, timeout: Duration) -> Option<R> {
        let _items = lock_when_timeout(&self.items, &self.not_empty, timeout, has_items)?;
        Some(f(self))
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .field("waiters", &self.not_empty.waiters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = Queue::new();
        for c in ["a", "b", "c"] {
            q.push_back(c);
        }
        assert_eq!(q.pop_front(), "a");
        assert_eq!(q.pop_front(), "b");
        assert_eq!(q.pop_front(), "c");
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_pop_sizes() {
        let q = Queue::new();
        for i in 0..100u32 {
            assert_eq!(q.len(), i as usize);
            q.push_back(i);
        }
        for i in 0..100u32 {
            assert_eq!(q.pop_front(), i);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_front_and_pop_back() {
        let q = Queue::new();
        q.push_back(2);
        q.push_front(1);
        q.push_back(3);
        assert_eq!(q.pop_back(), 3);
        assert_eq!(q.pop_front(), 1);
        assert_eq!(q.try_pop_back(), Some(2));
        assert_eq!(q.try_pop_back(), None);
    }

    #[test]
    fn test_try_pop_empty() {
        let q: Queue<u8> = Queue::new();
        assert_eq!(q.try_pop_front(), None);
    }

    #[test]
    fn test_pop_timeout_expires() {
        let q: Queue<u8> = Queue::new();
        let start = Instant::now();
        assert_eq!(q.pop_front_timeout(Duration::from_millis(25)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = Arc::new(Queue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                q.push_back(42u32);
            })
        };

        assert_eq!(q.pop_front(), 42);
        producer.join().unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn test_timed_pop_receives_late_push() {
        let q = Arc::new(Queue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.push_back("late");
            })
        };

        assert_eq!(q.pop_front_timeout(Duration::from_secs(5)), Some("late"));
        producer.join().unwrap();
    }

    #[test]
    fn test_functor_protocol() {
        let q = Queue::new();
        q.push_back(5);
        q.push_back(6);

        let sum = q.when_not_empty(|q| {
            let mut sum = 0;
            while let Some(n) = q.try_pop_front() {
                sum += n;
            }
            sum
        });
        assert_eq!(sum, 11);
        assert!(q.is_empty());

        assert_eq!(q.if_not_empty(|q| q.len(), Duration::ZERO), None);
        q.push_back(1);
        assert_eq!(q.if_not_empty(|q| q.len(), Duration::ZERO), Some(1));
    }

    #[test]
    fn test_functor_reenters_queue() {
        let q = Queue::new();
        q.push_back(1);
        q.push_back(2);

        let left = q.when_not_empty(|q| {
            q.pop_front();
            q.push_back(3);
            assert!(format!("{:?}", q).contains("len"));
            q.len()
        });
        assert_eq!(left, 2);
        assert_eq!(q.if_not_empty(|q| q.is_empty(), Duration::ZERO), Some(false));
        assert_eq!(q.pop_front(), 2);
        assert_eq!(q.pop_front(), 3);
    }

    #[test]
    fn test_functor_is_atomic_against_other_threads() {
        let q = Arc::new(Queue::new());
        q.push_back(0u32);

        let pusher = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                q.push_back(99);
            })
        };

        // The pusher cannot land between the two reads.
        let (before, after) = q.when_not_empty(|q| {
            let before = q.len();
            thread::sleep(Duration::from_millis(30));
            (before, q.len())
        });
        assert_eq!(before, after);
        pusher.join().unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_clear() {
        let q = Queue::new();
        q.push_back(1);
        q.push_back(2);
        q.clear();
        assert!(q.is_empty());
    }
}
