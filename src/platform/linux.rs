//! Futex-based parking backend for Linux.

use core::sync::atomic::{AtomicU32, Ordering::SeqCst};
use core::time::Duration;

use super::Pal;

const FUTEX_WAIT_PRIVATE: usize = 0 | 128;
const FUTEX_WAKE_PRIVATE: usize = 1 | 128;

/// One private futex word. 0 = no wake yet, 1 = woken.
pub struct WaitData {
    futex: AtomicU32,
}

pub struct Sys;

unsafe fn futex(addr: *const AtomicU32, op: usize, val: usize, timeout: usize) -> usize {
    // Wait errors (EAGAIN, EINTR, ETIMEDOUT) all surface as an early
    // return, which the parking state machine treats as spurious.
    sc::syscall!(FUTEX, addr as usize, op, val, timeout, 0, 0)
}

impl Pal for Sys {
    type WaitData = WaitData;

    fn create() -> *mut WaitData {
        Box::into_raw(Box::new(WaitData {
            futex: AtomicU32::new(0),
        }))
    }

    unsafe fn wait(data: *mut WaitData, _should_wait: &dyn Fn() -> bool) {
        // The futex word itself carries the "already woken" signal, so the
        // caller-supplied condition is not needed: a wake that landed first
        // stored 1 and FUTEX_WAIT returns EAGAIN straight away.
        let word = &(*data).futex;
        if word.load(SeqCst) == 0 {
            futex(word, FUTEX_WAIT_PRIVATE, 0, 0);
        }
    }

    unsafe fn timed_wait(data: *mut WaitData, timeout: Duration, _should_wait: &dyn Fn() -> bool) {
        let ts = libc::timespec {
            tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as _,
        };
        let word = &(*data).futex;
        if word.load(SeqCst) == 0 {
            futex(word, FUTEX_WAIT_PRIVATE, 0, &ts as *const _ as usize);
        }
    }

    unsafe fn wake(data: *mut WaitData) {
        let word = &(*data).futex;
        word.store(1, SeqCst);
        futex(word, FUTEX_WAKE_PRIVATE, 1, 0);
    }

    unsafe fn destroy(data: *mut WaitData) {
        drop(Box::from_raw(data));
    }
}
