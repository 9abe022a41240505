//! Finagle - cooperative reactor and blocking synchronization core
//!
//! Two concurrency models live side by side and are kept apart:
//!
//! - **Cooperative, single-threaded**: [`runtime::AppLoop`] drives
//!   [`runtime::Timer`]s and [`runtime::FileDescWatcher`]s from one thread,
//!   polling descriptors with `poll(2)` inside a bounded time budget.
//! - **Preemptive, multi-threaded**: [`sync::Mutex`], [`sync::WaitCondition`]
//!   and the [`queue`] family hand work between OS threads;
//!   [`sync::PriorityMutex`] arbitrates a shared resource by priority.
//!
//! # Features
//!
//! - **Recursive mutex**: the owning thread may re-enter; unbalanced unlocks
//!   are usage errors
//! - **Lossless wakeups**: a signal sent between a consumer's emptiness check
//!   and its sleep is never lost
//! - **Phase-stable timers**: recurring timers re-arm at `alarm + period`
//! - **Cooperative cancellation**: [`runtime::ExitToken`] stops a loop from
//!   any thread
//!
//! # Example
//!
//! ```rust
//! use finagle::queue::Queue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(Queue::new());
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             queue.push_back(i);
//!         }
//!     })
//! };
//!
//! let sum: i32 = (0..100).map(|_| queue.pop_front()).sum();
//! producer.join().unwrap();
//! assert_eq!(sum, 4950);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │  AppLoop (1 thread)  │        │  worker threads              │
//! │  Timer, Watcher,     │  push  │  Queue / PriorityQueue /     │
//! │  idle                │ ─────▶ │  SizedQueue                  │
//! └──────────────────────┘        └──────────────┬───────────────┘
//!                                                │
//!                                                ▼
//!                                 ┌──────────────────────────────┐
//!                                 │  Mutex + WaitCondition       │
//!                                 └──────────────────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handle;
pub mod queue;
pub mod runtime;
pub mod signal;
pub mod sync;

// Re-export commonly used types
pub use config::{ConfigError, FinagleConfig, QueueConfig, ReactorConfig};
pub use error::{Error, Result};
pub use handle::{Handle, RefCount};
pub use queue::{PriorityQueue, Queue, SizedQueue};
pub use runtime::{AppLoop, ExitToken, FileDescWatchable, FileDescWatcher, Timer};
pub use signal::{Signal, SlotId, SyncSignal};
pub use sync::{Lock, Mutex, PriorityLock, PriorityMutex, WaitCondition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
