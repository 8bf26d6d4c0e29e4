use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use renewable::{OnDemand, Periods, Producer, Renewable};
use renewable_test::{
    Alternating, DEFAULT_PERIOD, ERROR_PERIOD, assert_alternating_sequence,
    assert_alternating_sequence_concurrently, setup,
};

fn alternating_cache(producer: &Alternating) -> OnDemand<u64, String> {
    OnDemand::new(
        Periods::new(DEFAULT_PERIOD, ERROR_PERIOD),
        Producer::new(producer.producer()).named("alternating"),
    )
}

#[test]
fn test_alternating_sequence() {
    setup();

    let producer = Alternating::new();
    let cache = alternating_cache(&producer);

    assert_alternating_sequence(|| cache.get(), &producer, 8);
}

#[test]
fn test_alternating_sequence_concurrently() {
    setup();

    let producer = Alternating::new();
    let cache = alternating_cache(&producer);

    assert_alternating_sequence_concurrently(move || cache.get(), &producer, 8);
}

#[test]
fn test_concurrent_callers_share_one_production() {
    setup();

    const CALLERS: usize = 16;

    let producer = Alternating::with_delay(Duration::from_millis(50));
    let cache = OnDemand::new(
        Periods::same(Duration::from_secs(60)),
        Producer::new(producer.producer()),
    );
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Ok(0));
    }
    assert_eq!(producer.calls(), 1);
    assert_eq!(producer.overlaps(), 0);
}

#[test]
fn test_errors_are_cached() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = OnDemand::<(), _>::new(
        Periods::new(Duration::from_secs(60), Duration::from_millis(50)),
        Producer::new({
            let calls = Arc::clone(&calls);
            move || Err(format!("attempt {}", calls.fetch_add(1, Ordering::SeqCst)))
        }),
    );

    assert_eq!(cache.get(), Err("attempt 0".to_owned()));
    assert_eq!(cache.get(), Err("attempt 0".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    thread::sleep(Duration::from_millis(60));

    assert_eq!(cache.get(), Err("attempt 1".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panicking_producer_is_retried() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = OnDemand::<_, String>::new(
        Periods::same(Duration::from_secs(60)),
        Producer::new({
            let calls = Arc::clone(&calls);
            move || match calls.fetch_add(1, Ordering::SeqCst) {
                0 => panic!("producer exploded"),
                n => Ok(n),
            }
        }),
    );

    assert!(catch_unwind(AssertUnwindSafe(|| cache.get())).is_err());
    assert!(cache.snapshot().is_none());

    assert_eq!(cache.get(), Ok(1));
    assert_eq!(cache.get(), Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
