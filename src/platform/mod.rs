//! Platform backends for suspending and resuming threads.
//!
//! The parking state machine in [`crate::parking`] is agnostic to how a
//! thread is actually put to sleep; everything OS-specific sits behind
//! [`Pal`]. On Linux the default backend is a raw futex word; everywhere
//! else on unix (and on Linux with the `pthread-park` feature) a
//! mutex/condvar pair is used.

use core::time::Duration;

pub use self::sys::Sys;

#[cfg(all(target_os = "linux", not(feature = "pthread-park")))]
#[path = "linux.rs"]
mod sys;

#[cfg(any(
    all(unix, not(target_os = "linux")),
    all(target_os = "linux", feature = "pthread-park")
))]
#[path = "posix.rs"]
mod sys;

#[cfg(not(unix))]
compile_error!("threadpark only supports unix targets");

/// Contract a platform must provide for one park/unpark site.
///
/// Wait-data is created per park episode and destroyed by exactly one of
/// the two racing sides (see the Unparking handshake in `crate::parking`).
/// A `wait` may return spuriously; callers re-check their condition in a
/// loop. A `wake` that lands before the matching `wait` must make that
/// `wait` return immediately.
pub trait Pal {
    type WaitData;

    /// Allocate wait-data for one park call. The returned pointer is
    /// aligned to at least 4 bytes (the parker tags its low bits).
    fn create() -> *mut Self::WaitData;

    /// Block the calling thread until woken or a spurious wakeup.
    ///
    /// `should_wait` is re-checked at a point where a concurrent [`wake`]
    /// can no longer be lost; if it returns false the call returns without
    /// sleeping.
    ///
    /// # Safety
    /// `data` must come from [`create`] on this backend and not yet be
    /// destroyed.
    ///
    /// [`wake`]: Pal::wake
    /// [`create`]: Pal::create
    unsafe fn wait(data: *mut Self::WaitData, should_wait: &dyn Fn() -> bool);

    /// As [`wait`], but gives up after `timeout`.
    ///
    /// # Safety
    /// Same as [`wait`].
    ///
    /// [`wait`]: Pal::wait
    unsafe fn timed_wait(
        data: *mut Self::WaitData,
        timeout: Duration,
        should_wait: &dyn Fn() -> bool,
    );

    /// Wake the thread waiting on `data`, if any; otherwise make the next
    /// wait on `data` return immediately.
    ///
    /// # Safety
    /// Same as [`wait`].
    ///
    /// [`wait`]: Pal::wait
    unsafe fn wake(data: *mut Self::WaitData);

    /// Deallocate wait-data. Must be called exactly once per [`create`].
    ///
    /// # Safety
    /// No other thread may still use `data`.
    ///
    /// [`create`]: Pal::create
    unsafe fn destroy(data: *mut Self::WaitData);
}

/// Wait-data of the selected backend.
pub type WaitData = <Sys as Pal>::WaitData;
