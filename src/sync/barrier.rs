//! Single-use and cyclic barriers.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;

use crate::parking::{self, ParkingHandle, ThreadParker};
use crate::sync::queue::MsQueue;

/// How a [`Barrier::wait`] call returned.
pub enum WaitResult {
    /// This thread was the last arrival and released everyone else.
    NotifiedAll,
    /// This thread waited for the last arrival.
    Waited,
}

// Slot values below any possible handle pointer.
const EMPTY_SLOT: usize = 0;
const FINISHED: usize = 1;

/// Single-use barrier: blocks every participant until all `parties` have
/// arrived. The last arrival releases the rest through a fixed array of
/// per-waiter slots; reusing the barrier is a caller error.
pub struct Barrier {
    parties: usize,
    count: AtomicU32,
    waiters: Vec<AtomicUsize>,
}

impl Barrier {
    /// # Panics
    /// If `parties < 2`; a one-party barrier never blocks and hints at a
    /// construction bug.
    pub fn new(parties: u32) -> Self {
        assert!(parties > 1, "a barrier needs at least two parties");
        Barrier {
            parties: parties as usize,
            count: AtomicU32::new(0),
            waiters: (1..parties).map(|_| AtomicUsize::new(EMPTY_SLOT)).collect(),
        }
    }

    pub fn wait(&self) -> WaitResult {
        let my_index = self.count.fetch_add(1, SeqCst) as usize;
        if my_index == self.parties - 1 {
            self.wake_everyone();
            return WaitResult::NotifiedAll;
        }
        assert!(
            my_index < self.parties,
            "barrier entered by more threads than parties"
        );
        let me = parking::current_thread_handle();
        let slot = &self.waiters[my_index];
        loop {
            match slot.load(SeqCst) {
                EMPTY_SLOT => {
                    let raw = me.clone().into_raw() as usize;
                    if slot.compare_exchange(EMPTY_SLOT, raw, SeqCst, SeqCst).is_err() {
                        // Lost to the last arrival; hand the reference back.
                        unsafe { drop(ParkingHandle::from_raw(raw as *const ThreadParker)) };
                    }
                }
                FINISHED => return WaitResult::Waited,
                _ => parking::park(Duration::MAX),
            }
        }
    }

    fn wake_everyone(&self) {
        for slot in &self.waiters {
            loop {
                let waiter = slot.load(SeqCst);
                if slot.compare_exchange(waiter, FINISHED, SeqCst, SeqCst).is_ok() {
                    if waiter > FINISHED {
                        let handle =
                            unsafe { ParkingHandle::from_raw(waiter as *const ThreadParker) };
                        parking::unpark(&handle);
                    } else if waiter == FINISHED {
                        panic!("single-use barrier entered a second time");
                    }
                    // EMPTY_SLOT: the waiter has arrived (the count says
                    // so) but not registered; FINISHED doubles as its
                    // go-ahead.
                    break;
                }
            }
        }
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        for slot in &mut self.waiters {
            let waiter = *slot.get_mut();
            if waiter > FINISHED {
                unsafe { drop(ParkingHandle::from_raw(waiter as *const ThreadParker)) };
            }
        }
    }
}

struct CyclicSlot {
    handle: ParkingHandle,
    woken: AtomicBool,
}

/// Reusable barrier built on a generation-tagged queue.
///
/// Every arrival enqueues itself; the arrival whose node id is a multiple
/// of `parties` is the last of its generation and wakes the other
/// `parties - 1`. Entries whose id is also a multiple of `parties` belong
/// to earlier generations' wakers (which never park) and are skipped, so
/// stale nodes cannot swallow a wake.
pub struct CyclicBarrier {
    parties: u64,
    queue: MsQueue<Arc<CyclicSlot>>,
}

impl CyclicBarrier {
    pub fn new(parties: u32) -> Self {
        assert!(parties > 0, "a cyclic barrier needs at least one party");
        CyclicBarrier {
            parties: parties as u64,
            queue: MsQueue::new(),
        }
    }

    pub fn wait(&self) {
        let slot = Arc::new(CyclicSlot {
            handle: parking::current_thread_handle(),
            woken: AtomicBool::new(false),
        });
        let n = self.queue.enqueue(slot.clone());
        if n % self.parties == 0 {
            let mut woken = 0;
            while woken < self.parties - 1 {
                let (id, other) = self
                    .queue
                    .dequeue()
                    .expect("cyclic barrier queue ran out before all parties were woken");
                if id % self.parties == 0 {
                    // A waker entry (this or an earlier generation).
                    continue;
                }
                if other
                    .woken
                    .compare_exchange(false, true, SeqCst, SeqCst)
                    .is_ok()
                {
                    parking::unpark(&other.handle);
                    woken += 1;
                }
            }
        } else {
            while !slot.woken.load(SeqCst) {
                parking::park(Duration::MAX);
            }
        }
    }
}
