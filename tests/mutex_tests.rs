use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use threadpark::sync::{ReentrantLock, ReentrantMutex};

#[test]
fn counter_increments_are_not_lost() {
    let lock = Arc::new(ReentrantLock::new(Cell::new(0u64)));
    let threads = 8u64;
    let rounds = 10_000u64;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..rounds {
                    let guard = lock.lock();
                    guard.set(guard.get() + 1);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.lock().get(), threads * rounds);
}

#[test]
fn lock_is_reentrant() {
    let mutex = ReentrantMutex::new();
    for _ in 0..10 {
        mutex.lock();
    }
    assert!(mutex.try_lock());
    for _ in 0..11 {
        mutex.unlock();
    }
    // Fully released again.
    assert!(mutex.try_lock());
    mutex.unlock();
}

#[test]
fn try_lock_for_succeeds_once_holder_releases() {
    let mutex = Arc::new(ReentrantMutex::new());
    let (tx, rx) = mpsc::channel();
    let holder = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            mutex.lock();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            mutex.unlock();
        })
    };
    rx.recv().unwrap();
    assert!(mutex.try_lock_for(Duration::from_millis(2000)));
    mutex.unlock();
    holder.join().unwrap();
}

#[test]
fn partial_unlock_keeps_the_mutex_held() {
    let mutex = Arc::new(ReentrantMutex::new());
    mutex.lock();
    mutex.lock();
    mutex.unlock();
    {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || assert!(!mutex.try_lock()))
            .join()
            .unwrap();
    }
    mutex.unlock();
    {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            assert!(mutex.try_lock());
            mutex.unlock();
        })
        .join()
        .unwrap();
    }
}

#[test]
fn try_lock_for_times_out_under_contention() {
    let mutex = Arc::new(ReentrantMutex::new());
    let (tx, rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let holder = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || {
            mutex.lock();
            tx.send(()).unwrap();
            done_rx.recv().unwrap();
            mutex.unlock();
        })
    };
    rx.recv().unwrap();
    let start = Instant::now();
    assert!(!mutex.try_lock_for(Duration::from_millis(100)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    done_tx.send(()).unwrap();
    holder.join().unwrap();
    // A timed-out waiter must not wedge the queue for later ones.
    assert!(mutex.try_lock_for(Duration::from_millis(2000)));
    mutex.unlock();
}

#[test]
#[should_panic(expected = "not holding")]
fn unlock_by_non_owner_panics() {
    let mutex = Arc::new(ReentrantMutex::new());
    mutex.lock();
    let mutex2 = Arc::clone(&mutex);
    // Propagate the panic into this thread for should_panic to see it.
    if let Err(panic) = thread::spawn(move || mutex2.unlock()).join() {
        std::panic::resume_unwind(panic);
    }
}

#[test]
#[should_panic(expected = "more times than it was locked")]
fn over_unlock_panics() {
    let mutex = ReentrantMutex::new();
    mutex.lock();
    mutex.unlock();
    mutex.unlock();
}

#[test]
fn waiters_are_served_in_arrival_order() {
    let mutex = Arc::new(ReentrantMutex::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    mutex.lock();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mutex = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            let h = thread::spawn(move || {
                mutex.lock();
                order.lock().unwrap().push(i);
                mutex.unlock();
            });
            // Stagger arrivals so each thread is queued before the next.
            thread::sleep(Duration::from_millis(100));
            h
        })
        .collect();
    mutex.unlock();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn randomized_holds_stay_live_and_exclusive() {
    let lock = Arc::new(ReentrantLock::new(Cell::new((0u64, 0u64))));
    let busy = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..6)
        .map(|seed| {
            let lock = Arc::clone(&lock);
            let busy = Arc::clone(&busy);
            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(seed);
                for _ in 0..500 {
                    let depth = rng.gen_range(1..4);
                    let guard = lock.lock();
                    assert_eq!(busy.fetch_add(1, SeqCst), 0, "two threads inside the lock");
                    for _ in 1..depth {
                        // Reentrant acquisitions must not deadlock.
                        let inner = lock.lock();
                        let (a, b) = inner.get();
                        inner.set((a + 1, b));
                    }
                    let (a, b) = guard.get();
                    guard.set((a, b + 1));
                    busy.fetch_sub(1, SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.lock().get().1, 6 * 500);
}

#[test]
fn guard_drop_releases_for_other_threads() {
    let lock = Arc::new(ReentrantLock::new(5u32));
    {
        let guard = lock.lock();
        assert_eq!(*guard, 5);
    }
    let lock2 = Arc::clone(&lock);
    thread::spawn(move || {
        let guard = lock2.try_lock().expect("lock should be free after guard drop");
        assert_eq!(*guard, 5);
    })
    .join()
    .unwrap();
}
