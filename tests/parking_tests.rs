use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use threadpark::{current_thread_handle, park, park_until, unpark};

#[test]
fn pre_delivered_permit_returns_immediately() {
    let handle = current_thread_handle();
    unpark(&handle);
    let start = Instant::now();
    park(Duration::from_secs(600));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn permits_do_not_accumulate() {
    let handle = current_thread_handle();
    unpark(&handle);
    unpark(&handle);
    // The two permits collapse into one; the first park consumes it.
    park(Duration::from_secs(600));
    let start = Instant::now();
    park(Duration::from_millis(50));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn timed_park_expires() {
    let start = Instant::now();
    park(Duration::from_millis(100));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(30), "park overshot far past its timeout");
}

#[test]
fn park_until_past_deadline_returns() {
    let start = Instant::now();
    park_until(Instant::now() - Duration::from_millis(10));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn cross_thread_unpark_wakes_parker() {
    let (tx, rx) = mpsc::channel();
    let parker = thread::spawn(move || {
        tx.send(current_thread_handle()).unwrap();
        park(Duration::MAX);
    });
    let handle = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    unpark(&handle);
    parker.join().unwrap();
}

#[test]
fn unpark_before_park_wins_the_race() {
    for _ in 0..200 {
        let (tx, rx) = mpsc::channel();
        let parker = thread::spawn(move || {
            tx.send(current_thread_handle()).unwrap();
            park(Duration::from_secs(600));
        });
        let handle = rx.recv().unwrap();
        unpark(&handle);
        parker.join().unwrap();
    }
}

#[test]
fn handle_identity_is_per_thread() {
    let mine = current_thread_handle();
    assert_eq!(mine, current_thread_handle());
    let theirs = thread::spawn(current_thread_handle).join().unwrap();
    assert_ne!(mine, theirs);
}
