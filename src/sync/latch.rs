//! One-shot countdown latch.

use core::sync::atomic::{AtomicI32, Ordering::SeqCst};
use std::time::Duration;

use crate::parking::{self, ParkingHandle};
use crate::sync::queue::MsQueue;

/// Gate that opens once [`count_down`] has been called `count` times.
/// Unlike the mutex, opening wakes *all* waiters at once.
///
/// [`count_down`]: CountDownLatch::count_down
pub struct CountDownLatch {
    count: AtomicI32,
    waiters: MsQueue<ParkingHandle>,
}

impl CountDownLatch {
    pub fn new(count: u32) -> Self {
        CountDownLatch {
            count: AtomicI32::new(count as i32),
            waiters: MsQueue::new(),
        }
    }

    /// Blocks until the count reaches zero. Returns immediately if it
    /// already has.
    pub fn wait(&self) {
        self.waiters.enqueue(parking::current_thread_handle());
        while self.count.load(SeqCst) > 0 {
            parking::park(Duration::MAX);
        }
    }

    /// Decrements the count. The call that reaches exactly zero drains the
    /// queue and unparks every registered waiter, including ones that
    /// enqueued but have not parked yet (pre-wake).
    pub fn count_down(&self) {
        if self.count.fetch_sub(1, SeqCst) - 1 != 0 {
            return;
        }
        while let Some((_, handle)) = self.waiters.dequeue() {
            parking::unpark(&handle);
        }
    }

    /// Remaining count; zero once the latch is open.
    pub fn count(&self) -> u32 {
        self.count.load(SeqCst).max(0) as u32
    }
}
