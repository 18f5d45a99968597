use std::sync::Arc;
use std::thread;

use threadpark::sync::Exchanger;

#[test]
fn two_threads_swap_their_sequences() {
    let exchanger = Arc::new(Exchanger::new());
    let rounds = 1000u64;

    let evens = {
        let exchanger = Arc::clone(&exchanger);
        thread::spawn(move || {
            for i in 0..rounds {
                let got = exchanger.exchange(2 * i);
                assert_eq!(got, 2 * i + 1);
            }
        })
    };
    let odds = {
        let exchanger = Arc::clone(&exchanger);
        thread::spawn(move || {
            for i in 0..rounds {
                let got = exchanger.exchange(2 * i + 1);
                assert_eq!(got, 2 * i);
            }
        })
    };
    evens.join().unwrap();
    odds.join().unwrap();
}

#[test]
fn owned_values_move_across_the_exchange() {
    let exchanger = Arc::new(Exchanger::new());
    let other = {
        let exchanger = Arc::clone(&exchanger);
        thread::spawn(move || exchanger.exchange(String::from("ping")))
    };
    let got = exchanger.exchange(String::from("pong"));
    assert_eq!(got, "ping");
    assert_eq!(other.join().unwrap(), "pong");
}

#[test]
fn staggered_arrivals_still_pair_up() {
    let exchanger = Arc::new(Exchanger::new());
    for round in 0..20u32 {
        let other = {
            let exchanger = Arc::clone(&exchanger);
            thread::spawn(move || exchanger.exchange(round))
        };
        if round % 2 == 0 {
            // Let the partner install first on even rounds.
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(exchanger.exchange(round + 1000), round);
        assert_eq!(other.join().unwrap(), round + 1000);
    }
}
