//! Pairwise rendezvous exchange.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering::SeqCst};
use std::time::Duration;

use crate::parking::{self, ParkingHandle};

type Offer<T> = (ParkingHandle, T);

/// Rendezvous point where two threads swap values.
///
/// A single slot holds the pending offer. The first thread installs its
/// boxed `(handle, value)` pair and parks. Its partner swaps its own pair
/// in, takes the previous one, and wakes the owner; the woken thread then
/// claims whatever currently sits in the slot. Claiming is a CAS to null
/// so that under three or more threads an offer can only be taken once.
pub struct Exchanger<T> {
    slot: AtomicPtr<Offer<T>>,
}

unsafe impl<T: Send> Send for Exchanger<T> {}
unsafe impl<T: Send> Sync for Exchanger<T> {}

impl<T> Exchanger<T> {
    pub fn new() -> Self {
        Exchanger {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Blocks until another thread also calls `exchange`, then returns
    /// that thread's value.
    pub fn exchange(&self, item: T) -> T {
        let me = parking::current_thread_handle();
        let mine = Box::into_raw(Box::new((me, item)));
        match self
            .slot
            .compare_exchange(ptr::null_mut(), mine, SeqCst, SeqCst)
        {
            Ok(_) => self.wait_for_partner(mine),
            Err(_) => {
                let prev = self.slot.swap(mine, SeqCst);
                if prev.is_null() {
                    // The earlier offer was claimed between our load and
                    // the swap; we are now the installed party.
                    return self.wait_for_partner(mine);
                }
                let theirs = unsafe { Box::from_raw(prev) };
                parking::unpark(&theirs.0);
                while self.slot.load(SeqCst) == mine {
                    parking::park(Duration::MAX);
                }
                theirs.1
            }
        }
    }

    /// Waits for the installed offer `mine` to be replaced, then claims
    /// the replacement. Spurious wakes fall through to the claim CAS and
    /// park again if nothing changed.
    fn wait_for_partner(&self, mine: *mut Offer<T>) -> T {
        loop {
            let current = self.slot.load(SeqCst);
            if current == mine {
                parking::park(Duration::MAX);
                continue;
            }
            if current.is_null() {
                // Another waiter claimed the offer first and nobody has
                // installed a new one yet. A fresh installer will not
                // unpark us, so stay runnable until an offer appears.
                std::thread::yield_now();
                continue;
            }
            if self
                .slot
                .compare_exchange(current, ptr::null_mut(), SeqCst, SeqCst)
                .is_ok()
            {
                let theirs = unsafe { Box::from_raw(current) };
                parking::unpark(&theirs.0);
                return theirs.1;
            }
        }
    }
}

impl<T> Default for Exchanger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Exchanger<T> {
    fn drop(&mut self) {
        let leftover = *self.slot.get_mut();
        if !leftover.is_null() {
            unsafe { drop(Box::from_raw(leftover)) };
        }
    }
}
