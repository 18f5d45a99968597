//! Thread parking and unparking support.
//!
//! A call to [`park`] or [`park_until`] suspends the current thread until
//! one of: a matching [`unpark`], the timeout/deadline passing, or a
//! spurious wakeup. The caller is responsible for checking why it woke and
//! looping if needed:
//!
//! ```no_run
//! use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
//! use std::time::Duration;
//! # static WAIT: AtomicBool = AtomicBool::new(true);
//!
//! // waiting side (after publishing its handle somewhere shared)
//! while WAIT.load(SeqCst) {
//!     threadpark::parking::park(Duration::MAX);
//! }
//! ```
//!
//! An [`unpark`] aimed at a thread that is not parked is remembered: the
//! next park call returns immediately, exactly once. This pre-wake does not
//! accumulate across repeated unparks.

use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::platform::{Pal, Sys, WaitData};

// Parker state word. FREE and UNPARKED are sentinels; any other value is
// the wait-data pointer of the current park episode (low two bits clear),
// optionally tagged with UNPARKING while an unpark call is mid-flight.
// Tagging the in-flight unpark with the episode's own pointer gives it the
// per-episode identity needed to decide who destroys the wait-data.
const FREE: usize = 0;
const UNPARKED: usize = 1;
const UNPARKING: usize = 2;

/// Identifies a thread for [`unpark`]. Obtained from
/// [`current_thread_handle`]; stable and unique for the thread's lifetime.
#[derive(Clone)]
pub struct ParkingHandle(Arc<ThreadParker>);

impl PartialEq for ParkingHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ParkingHandle {}

impl core::fmt::Debug for ParkingHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ParkingHandle({:p})", Arc::as_ptr(&self.0))
    }
}

impl ParkingHandle {
    pub(crate) fn as_ptr(&self) -> *const ThreadParker {
        Arc::as_ptr(&self.0)
    }

    pub(crate) fn into_raw(self) -> *const ThreadParker {
        Arc::into_raw(self.0)
    }

    /// # Safety
    /// `ptr` must come from [`ParkingHandle::into_raw`] and not have been
    /// reclaimed already.
    pub(crate) unsafe fn from_raw(ptr: *const ThreadParker) -> Self {
        ParkingHandle(Arc::from_raw(ptr))
    }
}

/// Per-thread parking state machine.
///
/// Exactly one thread (the owner) may park; any thread may unpark. The
/// whole state lives in one word so every transition is a single CAS and
/// no torn flag combination can exist.
pub(crate) struct ThreadParker {
    state: AtomicUsize,
}

impl ThreadParker {
    fn new() -> Self {
        ThreadParker {
            state: AtomicUsize::new(FREE),
        }
    }

    pub(crate) fn park(&self) {
        self.park_with(|pd| unsafe {
            Sys::wait(pd, &|| self.state.load(SeqCst) == pd as usize);
        });
    }

    pub(crate) fn park_deadline(&self, deadline: Instant) {
        self.park_with(|pd| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                unsafe {
                    Sys::timed_wait(pd, remaining, &|| self.state.load(SeqCst) == pd as usize);
                }
            }
        });
    }

    fn park_with(&self, invoke_wait: impl Fn(*mut WaitData)) {
        loop {
            match self.state.load(SeqCst) {
                FREE => {
                    let pd = Sys::create();
                    debug_assert_eq!(pd as usize & 3, 0);
                    // Lost the slot to a concurrent pre-wake: clean up and
                    // re-examine.
                    if self
                        .state
                        .compare_exchange(FREE, pd as usize, SeqCst, SeqCst)
                        .is_err()
                    {
                        unsafe { Sys::destroy(pd) };
                        continue;
                    }

                    invoke_wait(pd);

                    loop {
                        let s = self.state.load(SeqCst);
                        if s == pd as usize {
                            // Still parked: spurious wakeup or timeout.
                            if self.state.compare_exchange(s, FREE, SeqCst, SeqCst).is_ok() {
                                unsafe { Sys::destroy(pd) };
                                return;
                            }
                        } else if s == pd as usize | UNPARKING {
                            // An unparker is mid-flight; it still holds the
                            // wait-data, so destruction falls to it.
                            if self.state.compare_exchange(s, FREE, SeqCst, SeqCst).is_ok() {
                                return;
                            }
                        } else if s == FREE || s == UNPARKED {
                            // The unparker finished (FREE), possibly
                            // followed by another pre-wake (UNPARKED).
                            unsafe { Sys::destroy(pd) };
                            return;
                        } else {
                            unreachable!("parker state corrupted: {:#x}", s);
                        }
                    }
                }
                // Pre-wake pending: consume it and return immediately.
                UNPARKED => {
                    if self
                        .state
                        .compare_exchange(UNPARKED, FREE, SeqCst, SeqCst)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Parked or Unparking on entry means two concurrent park
                // calls on one parker, which the ownership rule forbids.
                _ => panic!("thread attempted to park while already parked"),
            }
        }
    }

    pub(crate) fn unpark(&self) {
        loop {
            let s = self.state.load(SeqCst);
            if s == UNPARKED || s & UNPARKING != 0 {
                // Already pre-woken, or another unpark is doing the work.
                return;
            }
            if s == FREE {
                if self
                    .state
                    .compare_exchange(FREE, UNPARKED, SeqCst, SeqCst)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            // Parked(pd): claim the wake.
            let pd = s as *mut WaitData;
            if self
                .state
                .compare_exchange(s, s | UNPARKING, SeqCst, SeqCst)
                .is_ok()
            {
                unsafe { Sys::wake(pd) };
                if self
                    .state
                    .compare_exchange(s | UNPARKING, FREE, SeqCst, SeqCst)
                    .is_err()
                {
                    // The parker already left; the wait-data is ours to
                    // reclaim.
                    unsafe { Sys::destroy(pd) };
                }
                return;
            }
        }
    }
}

thread_local! {
    static PARKER: Arc<ThreadParker> = Arc::new(ThreadParker::new());
}

/// The handle other threads can use to unpark the current thread.
pub fn current_thread_handle() -> ParkingHandle {
    PARKER.with(|p| ParkingHandle(p.clone()))
}

/// Parks the current thread for up to `timeout`. `Duration::MAX` (or any
/// timeout that overflows the clock) parks without a deadline.
pub fn park(timeout: Duration) {
    PARKER.with(|p| match Instant::now().checked_add(timeout) {
        Some(deadline) => p.park_deadline(deadline),
        None => p.park(),
    });
}

/// Parks the current thread until `deadline`.
pub fn park_until(deadline: Instant) {
    PARKER.with(|p| p.park_deadline(deadline));
}

/// Wakes the thread `handle` belongs to, or pre-wakes its next park call.
/// Always safe to call redundantly.
pub fn unpark(handle: &ParkingHandle) {
    handle.0.unpark();
}
