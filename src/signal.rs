//! Observer lists
//!
//! [`Signal`] is the single-threaded subscriber list the reactor fires
//! (timer alarms, descriptor readiness, idle). [`SyncSignal`] is the
//! thread-safe variant used by [`PriorityLock`](crate::sync::PriorityLock).
//!
//! Emission works on a snapshot of the subscribers, so a callback may
//! connect, disconnect or re-emit on the same signal.

use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u64);

type Slot = Rc<dyn Fn()>;
type SyncSlot = Arc<dyn Fn() + Send + Sync>;

/// Single-threaded list of callbacks.
#[derive(Default)]
pub struct Signal {
    slots: RefCell<Vec<(SlotId, Slot)>>,
    next_id: Cell<u64>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `f`; subscribers run in connection order.
    pub fn connect<F: Fn() + 'static>(&self, f: F) -> SlotId {
        let id = SlotId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().push((id, Rc::new(f)));
        id
    }

    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Invoke every subscriber.
    pub fn emit(&self) {
        let snapshot: Vec<Slot> = self
            .slots
            .borrow()
            .iter()
            .map(|(_, f)| Rc::clone(f))
            .collect();
        for f in snapshot {
            f();
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Thread-safe list of callbacks.
#[derive(Default)]
pub struct SyncSignal {
    slots: Mutex<Vec<(SlotId, SyncSlot)>>,
    next_id: AtomicU64,
}

impl SyncSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F: Fn() + Send + Sync + 'static>(&self, f: F) -> SlotId {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().push((id, Arc::new(f)));
        id
    }

    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Invoke every subscriber on the calling thread. The subscriber list is
    /// not locked while callbacks run.
    pub fn emit(&self) {
        let snapshot: Vec<SyncSlot> = self
            .slots
            .lock()
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for f in snapshot {
            f();
        }
    }
}

impl fmt::Debug for SyncSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSignal")
            .field("subscribers", &self.len())
            .finish()
    }
}
