//! Thread parking and blocking synchronization primitives.
//!
//! The foundation is [`parking`]: a per-thread parker with a four-state
//! lifecycle (free, parked, unparking, pre-unparked) driven by a single
//! atomic word, backed by futex waits on Linux and a pthread mutex plus
//! condition variable elsewhere. Unpark permits do not accumulate; at most
//! one is pending per thread, and a permit delivered before the park call
//! makes that call return immediately.
//!
//! On top of the parker, [`sync`] provides a reentrant mutex with a
//! lock-free FIFO waiter queue along with a count-down latch, single-use
//! and cyclic barriers, and a pairwise exchanger.
//!
//! ```
//! use std::cell::Cell;
//! use std::sync::Arc;
//! use threadpark::sync::ReentrantLock;
//!
//! let lock = Arc::new(ReentrantLock::new(Cell::new(0u32)));
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let lock = Arc::clone(&lock);
//!         std::thread::spawn(move || {
//!             for _ in 0..1000 {
//!                 let guard = lock.lock();
//!                 guard.set(guard.get() + 1);
//!             }
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(lock.lock().get(), 4000);
//! ```

mod platform;

pub mod parking;
pub mod sync;

pub use crate::parking::{current_thread_handle, park, park_until, unpark, ParkingHandle};
