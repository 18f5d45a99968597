//! Queue-based reentrant mutex.
//!
//! The lock state is a triple of atomics:
//!
//! - `claims` counts in-flight lock attempts: 0 = free, 1 = locked with no
//!   waiters, 4 = locked with three waiters. `fetch_add(1)` *is* the lock
//!   attempt — a result of 1 means sole claimant, lock acquired; more
//!   means contention, so the claimant enqueues and parks.
//! - `hold_count` is the reentrancy depth.
//! - `owner` identifies the holding thread (compared, never dereferenced).
//!
//! On enqueue the queue hands back its previous tail, and that is the node
//! the waiter parks on: when the waiter is woken its node is the queue
//! head, so it dequeues it and takes ownership. Unlocking decrements
//! `claims`; a positive result means waiters, so the head node is
//! signaled. Signaling works even for a claimant that has not parked yet,
//! because a wait node (like the parker underneath) remembers a pre-wake.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicI32, AtomicPtr, Ordering::SeqCst};
use std::time::{Duration, Instant};

use crossbeam_epoch as epoch;

use crate::parking::{self, ParkingHandle, ThreadParker};
use crate::sync::queue::WaiterQueue;

pub struct ReentrantMutex {
    claims: AtomicI32,
    hold_count: AtomicI32,
    owner: AtomicPtr<ThreadParker>,
    queue: WaiterQueue,
}

impl ReentrantMutex {
    pub fn new() -> Self {
        ReentrantMutex {
            claims: AtomicI32::new(0),
            hold_count: AtomicI32::new(0),
            owner: AtomicPtr::new(core::ptr::null_mut()),
            queue: WaiterQueue::new(),
        }
    }

    /// Acquires the mutex, parking until it is available. Reentrant: the
    /// holding thread may lock again and must unlock as many times.
    pub fn lock(&self) {
        let acquired = self.lock_internal(None);
        debug_assert!(acquired);
    }

    /// Non-blocking attempt; true if the mutex was acquired.
    pub fn try_lock(&self) -> bool {
        let me = parking::current_thread_handle();
        if self.is_held_by(&me) {
            self.hold_count.fetch_add(1, SeqCst);
            return true;
        }
        if self.claims.compare_exchange(0, 1, SeqCst, SeqCst).is_ok() {
            self.grant(&me);
            return true;
        }
        false
    }

    /// Attempts to acquire the mutex, parking for at most `timeout`.
    /// Returns false on timeout; timing out leaves the mutex as if the
    /// attempt never happened.
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.lock_internal(Some(deadline)),
            None => self.lock_internal(None),
        }
    }

    /// Releases the mutex once.
    ///
    /// # Panics
    /// If the calling thread does not hold the mutex, or unlocks more
    /// times than it locked. Both are unrecoverable misuse.
    pub fn unlock(&self) {
        let me = parking::current_thread_handle();
        if self.owner.load(SeqCst) != me.as_ptr() as *mut _ {
            panic!("mutex unlocked by a thread that is not holding it");
        }
        if self.hold_count.load(SeqCst) == 0 {
            panic!("mutex unlocked more times than it was locked");
        }

        let new_hold = self.hold_count.fetch_sub(1, SeqCst) - 1;
        if new_hold > 0 {
            return;
        }

        // Release the claim; a positive result means queued waiters.
        let remaining = self.claims.fetch_sub(1, SeqCst) - 1;
        if remaining == 0 {
            return;
        }
        assert!(remaining > 0, "mutex claim counter underflow");

        let guard = epoch::pin();
        loop {
            let head = self.queue.head(&guard);
            if head.wake() {
                return;
            }
            // Timed-out node: take back its claim, drop it, and keep
            // going unless the counter now says nobody is waiting.
            let remaining = self.claims.fetch_sub(1, SeqCst) - 1;
            assert!(remaining >= 0, "mutex claim counter underflow");
            self.queue.dequeue(&guard);
            if remaining == 0 {
                return;
            }
        }
    }

    // The order matters: hold_count is read before owner so a stale owner
    // value left by a previous holder can never satisfy the check.
    fn is_held_by(&self, me: &ParkingHandle) -> bool {
        self.hold_count.load(SeqCst) > 0 && self.owner.load(SeqCst) == me.as_ptr() as *mut _
    }

    fn grant(&self, me: &ParkingHandle) {
        self.owner.store(me.as_ptr() as *mut _, SeqCst);
        self.hold_count.fetch_add(1, SeqCst);
    }

    fn lock_internal(&self, deadline: Option<Instant>) -> bool {
        let me = parking::current_thread_handle();

        if self.is_held_by(&me) {
            self.hold_count.fetch_add(1, SeqCst);
            return true;
        }

        let claims = self.claims.fetch_add(1, SeqCst) + 1;
        if claims == 1 {
            // Sole claimant; acquired without touching the queue.
            self.grant(&me);
            return true;
        }

        // Contended: append a node and park on the previous tail. See
        // WaiterQueue::enqueue for why the pointer outlives the pin.
        let node = {
            let guard = epoch::pin();
            self.queue.enqueue(&guard)
        };
        let node = unsafe { &*node };

        if !node.wait(deadline) {
            // Timed out; the claim is reclaimed by whoever skips our node.
            return false;
        }

        // Awoken, so our node is the head: remove it and take ownership.
        let guard = epoch::pin();
        self.queue.dequeue(&guard);
        drop(guard);
        self.grant(&me);
        true
    }

    /// Queue length including the dummy node. Test use only.
    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for ReentrantMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`ReentrantMutex`] protecting a value, with an RAII guard.
///
/// Guards only hand out shared references: the same thread may hold
/// several guards at once through reentrancy, so exclusive access would be
/// unsound. Interior mutability (e.g. `Cell`) gives mutation when needed.
pub struct ReentrantLock<T> {
    raw: ReentrantMutex,
    content: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ReentrantLock<T> {}
unsafe impl<T: Send> Sync for ReentrantLock<T> {}

impl<T> ReentrantLock<T> {
    pub fn new(content: T) -> Self {
        ReentrantLock {
            raw: ReentrantMutex::new(),
            content: UnsafeCell::new(content),
        }
    }

    pub fn lock(&self) -> ReentrantLockGuard<'_, T> {
        self.raw.lock();
        ReentrantLockGuard { lock: self, _not_send: PhantomData }
    }

    pub fn try_lock(&self) -> Option<ReentrantLockGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(ReentrantLockGuard { lock: self, _not_send: PhantomData })
        } else {
            None
        }
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Option<ReentrantLockGuard<'_, T>> {
        if self.raw.try_lock_for(timeout) {
            Some(ReentrantLockGuard { lock: self, _not_send: PhantomData })
        } else {
            None
        }
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.content.into_inner()
    }
}

pub struct ReentrantLockGuard<'a, T> {
    lock: &'a ReentrantLock<T>,
    // Unlocking must happen on the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> Deref for ReentrantLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.content.get() }
    }
}

impl<'a, T> Drop for ReentrantLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}
