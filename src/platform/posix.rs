//! Condvar-based parking backend for POSIX targets without usable futexes.

use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;
use core::time::Duration;

use super::Pal;

pub struct WaitData {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
}

pub struct Sys;

/// A failing pthread call leaves the parking protocol in an undefined
/// state, so anything outside `expected` is fatal.
fn check(res: libc::c_int, expected: &[libc::c_int]) -> libc::c_int {
    if res != 0 && !expected.contains(&res) {
        panic!("pthread call failed with errno {}", res);
    }
    res
}

#[cfg(not(target_vendor = "apple"))]
unsafe fn cond_init(cond: *mut libc::pthread_cond_t) {
    let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
    check(libc::pthread_condattr_init(attr.as_mut_ptr()), &[]);
    check(
        libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC),
        &[],
    );
    check(libc::pthread_cond_init(cond, attr.as_ptr()), &[]);
    check(libc::pthread_condattr_destroy(attr.as_mut_ptr()), &[]);
}

#[cfg(target_vendor = "apple")]
unsafe fn cond_init(cond: *mut libc::pthread_cond_t) {
    // No pthread_condattr_setclock; timed waits use the relative variant.
    check(libc::pthread_cond_init(cond, core::ptr::null()), &[]);
}

/// Current CLOCK_MONOTONIC time plus `timeout`, normalized so that
/// `tv_nsec` stays below one second.
#[cfg(not(target_vendor = "apple"))]
unsafe fn deadline_timespec(timeout: Duration) -> libc::timespec {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    check(libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()), &[]);
    let mut ts = ts.assume_init();
    ts.tv_sec = ts
        .tv_sec
        .saturating_add(timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t);
    ts.tv_nsec += timeout.subsec_nanos() as libc::c_long;
    if ts.tv_nsec >= 1_000_000_000 {
        ts.tv_sec = ts.tv_sec.saturating_add(1);
        ts.tv_nsec -= 1_000_000_000;
    }
    ts
}

impl Pal for Sys {
    type WaitData = WaitData;

    fn create() -> *mut WaitData {
        unsafe {
            let data = Box::into_raw(Box::new(WaitData {
                mutex: MaybeUninit::zeroed().assume_init(),
                cond: MaybeUninit::zeroed().assume_init(),
            }));
            check(
                libc::pthread_mutex_init(addr_of_mut!((*data).mutex), core::ptr::null()),
                &[],
            );
            cond_init(addr_of_mut!((*data).cond));
            data
        }
    }

    unsafe fn wait(data: *mut WaitData, should_wait: &dyn Fn() -> bool) {
        let mutex = addr_of_mut!((*data).mutex);
        let cond = addr_of_mut!((*data).cond);
        check(libc::pthread_mutex_lock(mutex), &[]);
        // Checked under the mutex: a concurrent wake either already flipped
        // the parker state (condition false, no sleep) or blocks on this
        // mutex until cond_wait has registered.
        if should_wait() {
            check(libc::pthread_cond_wait(cond, mutex), &[]);
        }
        check(libc::pthread_mutex_unlock(mutex), &[]);
    }

    unsafe fn timed_wait(data: *mut WaitData, timeout: Duration, should_wait: &dyn Fn() -> bool) {
        let mutex = addr_of_mut!((*data).mutex);
        let cond = addr_of_mut!((*data).cond);
        check(libc::pthread_mutex_lock(mutex), &[]);
        if should_wait() {
            #[cfg(not(target_vendor = "apple"))]
            {
                let ts = deadline_timespec(timeout);
                check(
                    libc::pthread_cond_timedwait(cond, mutex, &ts),
                    &[libc::ETIMEDOUT],
                );
            }
            #[cfg(target_vendor = "apple")]
            {
                let ts = libc::timespec {
                    tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
                    tv_nsec: timeout.subsec_nanos() as libc::c_long,
                };
                check(
                    libc::pthread_cond_timedwait_relative_np(cond, mutex, &ts),
                    &[libc::ETIMEDOUT],
                );
            }
        }
        check(libc::pthread_mutex_unlock(mutex), &[]);
    }

    unsafe fn wake(data: *mut WaitData) {
        let mutex = addr_of_mut!((*data).mutex);
        check(libc::pthread_mutex_lock(mutex), &[]);
        check(libc::pthread_cond_signal(addr_of_mut!((*data).cond)), &[]);
        check(libc::pthread_mutex_unlock(mutex), &[]);
    }

    unsafe fn destroy(data: *mut WaitData) {
        check(libc::pthread_mutex_destroy(addr_of_mut!((*data).mutex)), &[]);
        check(libc::pthread_cond_destroy(addr_of_mut!((*data).cond)), &[]);
        drop(Box::from_raw(data));
    }
}
