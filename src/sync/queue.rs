//! Lock-free FIFO queues (Michael-Scott) used to order waiting threads.
//!
//! Two variants: [`WaiterQueue`] holds wait-nodes with an in-place signal
//! state and hands enqueuers the node they will park on; [`MsQueue`] is an
//! element-carrying queue with monotone node ids, used where waiters are
//! drained wholesale (latch) or filtered by generation (cyclic barrier).
//!
//! Nodes are retired through crossbeam-epoch: a dequeued node may still be
//! dereferenced by an enqueuer helping a lagging tail forward, so it is
//! never freed while any thread is pinned.

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::time::{Duration, Instant};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

use crate::parking::{self, ParkingHandle, ThreadParker};

// Wait-node signal state. Anything above TIMED_OUT is the raw pointer of
// the registered waiter's ParkingHandle (an Arc, so comfortably aligned
// past the sentinels).
const EMPTY: usize = 0;
const AWOKEN: usize = 1;
const TIMED_OUT: usize = 2;

/// One slot in a [`WaiterQueue`].
///
/// `state` moves `EMPTY -> WaitingAs(handle) -> {AWOKEN, TIMED_OUT}`; the
/// CAS into a terminal state decides the timeout-versus-wake race, and the
/// losing side conforms to the winner.
pub(crate) struct WaitNode {
    state: AtomicUsize,
    next: Atomic<WaitNode>,
}

impl WaitNode {
    fn new() -> Self {
        WaitNode {
            state: AtomicUsize::new(EMPTY),
            next: Atomic::null(),
        }
    }

    /// Parks the calling thread on this node until it is signaled or
    /// `deadline` passes. Returns true if awoken, false if timed out.
    ///
    /// After a successful `TIMED_OUT` transition the node is not touched
    /// again: the releasing thread may dequeue and retire it at any point
    /// from then on.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> bool {
        loop {
            let s = self.state.load(SeqCst);
            match s {
                AWOKEN => return true,
                TIMED_OUT => return false,
                _ => {}
            }

            if let Some(d) = deadline {
                if Instant::now() >= d {
                    if self.state.compare_exchange(s, TIMED_OUT, SeqCst, SeqCst).is_ok() {
                        if s != EMPTY {
                            // Take back the handle reference we registered.
                            unsafe { drop(ParkingHandle::from_raw(s as *const ThreadParker)) };
                        }
                        return false;
                    }
                    // Lost to a concurrent wake; the re-read will see it.
                    continue;
                }
            }

            if s == EMPTY {
                let raw = parking::current_thread_handle().into_raw() as usize;
                if self.state.compare_exchange(EMPTY, raw, SeqCst, SeqCst).is_err() {
                    // A wake got here first; give the reference back up.
                    unsafe { drop(ParkingHandle::from_raw(raw as *const ThreadParker)) };
                }
                continue;
            }

            match deadline {
                Some(d) => parking::park_until(d),
                None => parking::park(Duration::MAX),
            }
        }
    }

    /// Signals this node. Returns true if a waiter was (or will be, via
    /// pre-wake) let through, false if the node already timed out.
    pub(crate) fn wake(&self) -> bool {
        loop {
            let s = self.state.load(SeqCst);
            match s {
                // The claimant has enqueued but not registered yet; the
                // pre-wake lets its first park return immediately.
                EMPTY => {
                    if self.state.compare_exchange(EMPTY, AWOKEN, SeqCst, SeqCst).is_ok() {
                        return true;
                    }
                }
                AWOKEN => unreachable!("wait node signaled twice"),
                TIMED_OUT => return false,
                raw => {
                    if self.state.compare_exchange(raw, AWOKEN, SeqCst, SeqCst).is_ok() {
                        let handle = unsafe { ParkingHandle::from_raw(raw as *const ThreadParker) };
                        parking::unpark(&handle);
                        return true;
                    }
                }
            }
        }
    }
}

impl Drop for WaitNode {
    fn drop(&mut self) {
        let s = *self.state.get_mut();
        if s > TIMED_OUT {
            unsafe { drop(ParkingHandle::from_raw(s as *const ThreadParker)) };
        }
    }
}

/// FIFO of threads contending for a mutex. Always holds at least one node;
/// the head is the node the next-in-line waiter parks on.
pub(crate) struct WaiterQueue {
    head: Atomic<WaitNode>,
    tail: Atomic<WaitNode>,
}

impl WaiterQueue {
    pub(crate) fn new() -> Self {
        let queue = WaiterQueue {
            head: Atomic::null(),
            tail: Atomic::null(),
        };
        // Not shared yet, so an unprotected guard is fine.
        let dummy = Owned::new(WaitNode::new()).into_shared(unsafe { epoch::unprotected() });
        queue.head.store(dummy, SeqCst);
        queue.tail.store(dummy, SeqCst);
        queue
    }

    /// Appends a fresh node and returns the *previous* tail: the node the
    /// caller should park on, which becomes the queue head once everyone
    /// ahead has been served.
    ///
    /// The returned pointer stays valid without a pin: a node is only
    /// retired after a dequeue, and this node is dequeued either by the
    /// caller itself (once awoken) or, if it timed out, by a releaser that
    /// first observed the caller's terminal `TIMED_OUT` CAS — in both
    /// cases causally after the caller's last access through the pointer.
    pub(crate) fn enqueue(&self, guard: &Guard) -> *const WaitNode {
        let mut node = Owned::new(WaitNode::new());
        loop {
            let tail = self.tail.load(SeqCst, guard);
            let t = unsafe { tail.deref() };
            match t.next.compare_exchange(Shared::null(), node, SeqCst, SeqCst, guard) {
                Ok(new) => {
                    let _ = self.tail.compare_exchange(tail, new, SeqCst, SeqCst, guard);
                    return tail.as_raw();
                }
                Err(err) => {
                    // Help the lagging tail forward and retry.
                    node = err.new;
                    let next = t.next.load(SeqCst, guard);
                    let _ = self.tail.compare_exchange(tail, next, SeqCst, SeqCst, guard);
                }
            }
        }
    }

    /// The current head node.
    pub(crate) fn head<'g>(&self, guard: &'g Guard) -> &'g WaitNode {
        unsafe { self.head.load(SeqCst, guard).deref() }
    }

    /// Removes the head node. Callers only dequeue when the claim counter
    /// proves a waiter exists, so an empty queue here is a library bug.
    pub(crate) fn dequeue(&self, guard: &Guard) {
        loop {
            let head = self.head.load(SeqCst, guard);
            let next = unsafe { head.deref() }.next.load(SeqCst, guard);
            assert!(!next.is_null(), "waiter queue empty on dequeue");
            if self.head.compare_exchange(head, next, SeqCst, SeqCst, guard).is_ok() {
                unsafe { guard.defer_destroy(head) };
                return;
            }
        }
    }

    /// Number of nodes including the dummy. Not thread safe; test use only.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let guard = epoch::pin();
        let mut count = 0;
        let mut node = self.head.load(SeqCst, &guard);
        while !node.is_null() {
            count += 1;
            node = unsafe { node.deref() }.next.load(SeqCst, &guard);
        }
        count
    }
}

impl Drop for WaiterQueue {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(SeqCst, guard);
            while !node.is_null() {
                let next = node.deref().next.load(SeqCst, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

struct MsNode<T> {
    id: u64,
    item: UnsafeCell<Option<T>>,
    next: Atomic<MsNode<T>>,
}

/// Element-carrying Michael-Scott queue with monotone node ids.
///
/// Ids start at 1 and increase by one per enqueue, so callers can use them
/// as generation tags.
pub(crate) struct MsQueue<T> {
    head: Atomic<MsNode<T>>,
    tail: Atomic<MsNode<T>>,
}

// The item cell is only touched by the enqueuer before publication and by
// the unique dequeue CAS winner afterwards.
unsafe impl<T: Send> Send for MsQueue<T> {}
unsafe impl<T: Send> Sync for MsQueue<T> {}

impl<T> MsQueue<T> {
    pub(crate) fn new() -> Self {
        let queue = MsQueue {
            head: Atomic::null(),
            tail: Atomic::null(),
        };
        let dummy = Owned::new(MsNode {
            id: 0,
            item: UnsafeCell::new(None),
            next: Atomic::null(),
        })
        .into_shared(unsafe { epoch::unprotected() });
        queue.head.store(dummy, SeqCst);
        queue.tail.store(dummy, SeqCst);
        queue
    }

    /// Appends `item`, returning the id of its node.
    pub(crate) fn enqueue(&self, item: T) -> u64 {
        let guard = epoch::pin();
        let mut node = Owned::new(MsNode {
            id: 0,
            item: UnsafeCell::new(Some(item)),
            next: Atomic::null(),
        });
        loop {
            let tail = self.tail.load(SeqCst, &guard);
            let t = unsafe { tail.deref() };
            node.id = t.id + 1;
            let id = node.id;
            match t.next.compare_exchange(Shared::null(), node, SeqCst, SeqCst, &guard) {
                Ok(new) => {
                    let _ = self.tail.compare_exchange(tail, new, SeqCst, SeqCst, &guard);
                    return id;
                }
                Err(err) => {
                    node = err.new;
                    let next = t.next.load(SeqCst, &guard);
                    let _ = self.tail.compare_exchange(tail, next, SeqCst, SeqCst, &guard);
                }
            }
        }
    }

    /// Removes the oldest element, or None if the queue is logically empty.
    pub(crate) fn dequeue(&self) -> Option<(u64, T)> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(SeqCst, &guard);
            let next = unsafe { head.deref() }.next.load(SeqCst, &guard);
            if next.is_null() {
                return None;
            }
            if self.head.compare_exchange(head, next, SeqCst, SeqCst, &guard).is_ok() {
                let n = unsafe { next.deref() };
                // Sole owner of the cell from here: we won the head CAS.
                let item = unsafe { (*n.item.get()).take() };
                let id = n.id;
                unsafe { guard.defer_destroy(head) };
                return item.map(|item| (id, item));
            }
        }
    }
}

impl<T> Drop for MsQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(SeqCst, guard);
            while !node.is_null() {
                let next = node.deref().next.load(SeqCst, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_queue_is_fifo() {
        let queue = MsQueue::new();
        for i in 0..10 {
            assert_eq!(queue.enqueue(i), i as u64 + 1);
        }
        for i in 0..10 {
            let (id, item) = queue.dequeue().expect("queue ran dry");
            assert_eq!((id, item), (i as u64 + 1, i));
        }
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn waiter_queue_parks_on_previous_tail() {
        let queue = WaiterQueue::new();
        let guard = epoch::pin();
        let first = queue.enqueue(&guard);
        let second = queue.enqueue(&guard);
        assert_ne!(first, second);
        // The first enqueuer parks on the original dummy, which is head.
        assert!(core::ptr::eq(queue.head(&guard), first));
        assert_eq!(queue.len(), 3);
        queue.dequeue(&guard);
        assert!(core::ptr::eq(queue.head(&guard), second));
    }
}
