//! Blocking synchronization primitives for OS threads
//!
//! - [`Mutex`] / [`Lock`]: recursive mutual exclusion with a scoped guard
//! - [`WaitCondition`]: condition variable carrying its own recursive lock
//! - [`PriorityMutex`] / [`PriorityLock`]: cooperative priority arbitration
//!
//! These are independent of the single-threaded reactor in
//! [`runtime`](crate::runtime); the blocking queues in [`queue`](crate::queue)
//! are layered on the first two.

mod mutex;
mod priority_mutex;
mod wait_condition;

pub use mutex::{Lock, Mutex};
pub use priority_mutex::{LockId, PriorityLock, PriorityMutex};
pub use wait_condition::WaitCondition;
