use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use threadpark::sync::CountDownLatch;

#[test]
fn wait_on_open_latch_does_not_block() {
    let latch = CountDownLatch::new(0);
    latch.wait();
    assert_eq!(latch.count(), 0);
}

#[test]
fn waiters_see_all_work_done_before_release() {
    let workers = 8u64;
    let latch = Arc::new(CountDownLatch::new(workers as u32));
    let done = Arc::new(AtomicU64::new(0));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let latch = Arc::clone(&latch);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                latch.wait();
                assert_eq!(done.load(SeqCst), workers);
            })
        })
        .collect();

    let producers: Vec<_> = (0..workers)
        .map(|i| {
            let latch = Arc::clone(&latch);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * i));
                done.fetch_add(1, SeqCst);
                latch.count_down();
            })
        })
        .collect();

    for h in waiters.into_iter().chain(producers) {
        h.join().unwrap();
    }
    assert_eq!(latch.count(), 0);
}

#[test]
fn extra_count_downs_are_ignored() {
    let latch = Arc::new(CountDownLatch::new(1));
    latch.count_down();
    latch.count_down();
    latch.wait();
    let latch2 = Arc::clone(&latch);
    thread::spawn(move || latch2.wait()).join().unwrap();
}

#[test]
fn wait_after_release_returns_immediately() {
    let latch = Arc::new(CountDownLatch::new(2));
    latch.count_down();
    latch.count_down();
    for _ in 0..4 {
        let latch = Arc::clone(&latch);
        thread::spawn(move || latch.wait()).join().unwrap();
    }
}
