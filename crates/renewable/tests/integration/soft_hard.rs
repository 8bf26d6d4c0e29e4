use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use renewable::{CancellationToken, Periods, Producer, Renewable, SoftHard};
use renewable_test::{
    Alternating, DEFAULT_PERIOD, ERROR_PERIOD, MaxAge, Polling, SAFE_CHECK_PERIOD,
    assert_alternating_sequence, assert_alternating_sequence_concurrently, poll_ages, setup,
};

fn alternating_cache(producer: &Alternating, hard: Periods) -> SoftHard<u64, String> {
    SoftHard::new(
        Periods::new(DEFAULT_PERIOD, ERROR_PERIOD),
        hard,
        Producer::new(producer.producer()).named("alternating"),
    )
    .unwrap()
}

/// Produces the [`Instant`] each production finished at, after sleeping for `delay`.
fn clock(delay: Duration) -> (Producer<Instant, Instant>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = Producer::new({
        let calls = Arc::clone(&calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            Ok(Instant::now())
        }
    })
    .named("clock");
    (producer, calls)
}

#[test]
fn test_alternating_sequence_without_stale_window() {
    setup();

    let producer = Alternating::new();
    let cache = alternating_cache(&producer, Periods::new(DEFAULT_PERIOD, ERROR_PERIOD));

    assert_alternating_sequence(|| cache.get(), &producer, 8);
}

#[test]
fn test_alternating_sequence_concurrently_without_stale_window() {
    setup();

    let producer = Alternating::new();
    let cache = alternating_cache(&producer, Periods::new(DEFAULT_PERIOD, ERROR_PERIOD));

    assert_alternating_sequence_concurrently(move || cache.get(), &producer, 8);
}

#[test]
fn test_alternating_sequence_concurrently_with_stale_window() {
    setup();

    let producer = Alternating::new();
    let cache = alternating_cache(&producer, Periods::new(DEFAULT_PERIOD * 2, ERROR_PERIOD * 2));

    assert_alternating_sequence_concurrently(move || cache.get(), &producer, 8);
}

#[test]
fn test_readers_never_wait_while_refreshing() {
    setup();

    let soft = Duration::from_millis(100);
    let hard = Duration::from_millis(300);
    let delay = Duration::from_millis(50);
    let polling = Duration::from_secs(1);

    let (producer, calls) = clock(delay);
    let cache = SoftHard::new(Periods::same(soft), Periods::same(hard), producer).unwrap();
    cache.get().unwrap();

    let slowest = poll_ages(
        {
            let cache = cache.clone();
            move || cache.get()
        },
        Polling {
            readers: 4,
            interval: Duration::from_millis(5),
            duration: polling,
        },
        MaxAge {
            success: hard,
            failure: hard,
        },
    );

    assert!(slowest < delay, "a reader waited {slowest:?} for a refresh");

    // one production per soft period at most, plus the priming one and a running refresh
    let calls = calls.load(Ordering::SeqCst);
    let max_calls = (polling.as_millis() / soft.as_millis()) as usize + 2;
    assert!(calls > 1, "the value was never refreshed");
    assert!(calls <= max_calls, "{calls} productions, expected at most {max_calls}");
}

#[test]
fn test_alternating_results_stay_within_hard_periods() {
    setup();

    let soft = Periods::new(DEFAULT_PERIOD, ERROR_PERIOD);
    let hard = Periods::new(DEFAULT_PERIOD * 2, ERROR_PERIOD * 2);
    let polling = Duration::from_secs(2);

    let producer = Alternating::new();
    let cache = SoftHard::new(
        soft,
        hard,
        Producer::new(producer.stamping_producer()).named("alternating"),
    )
    .unwrap();
    cache.get().unwrap();

    let slowest = poll_ages(
        {
            let cache = cache.clone();
            move || cache.get()
        },
        Polling {
            readers: 4,
            interval: Duration::from_millis(10),
            duration: polling,
        },
        MaxAge {
            success: hard.success,
            failure: hard.failure,
        },
    );

    // stale results keep being served while the next one is produced in the background
    assert!(slowest < SAFE_CHECK_PERIOD, "a reader waited {slowest:?}");
    assert_eq!(producer.overlaps(), 0);

    // every result is replaced shortly after its soft deadline, and never before it
    let calls = producer.calls();
    let max_calls = (polling.as_millis() / DEFAULT_PERIOD.as_millis()) as u64 + 2;
    let min_calls = (polling.as_millis() / hard.failure.as_millis()) as u64;
    assert!(
        (min_calls..=max_calls).contains(&calls),
        "{calls} productions, expected between {min_calls} and {max_calls}"
    );
}

#[test]
fn test_past_hard_deadline_blocks_for_new_value() {
    setup();

    let delay = Duration::from_millis(30);
    let (producer, calls) = clock(delay);
    let cache = SoftHard::new(
        Periods::same(Duration::from_millis(50)),
        Periods::same(Duration::from_millis(100)),
        producer,
    )
    .unwrap();

    let first = cache.get().unwrap();
    thread::sleep(Duration::from_millis(120));

    let before = Instant::now();
    let second = cache.get().unwrap();
    assert!(before.elapsed() >= delay);
    assert!(second > before);
    assert!(second > first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_blocked_callers_share_one_production() {
    setup();

    const CALLERS: usize = 16;

    let producer = Alternating::with_delay(Duration::from_millis(50));
    let cache = alternating_cache(
        &producer,
        Periods::new(Duration::from_secs(60), Duration::from_secs(60)),
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
fn test_cancelled_production_is_cached() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let parent = CancellationToken::new();
    let producer = Producer::<(), _>::with_cancellation({
        let calls = Arc::clone(&calls);
        move |token: &CancellationToken| {
            calls.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(5);
            while !token.is_cancelled() {
                if Instant::now() > deadline {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err("cancelled".to_owned())
        }
    })
    .cancel_on(parent.clone());

    let cache = SoftHard::new(
        Periods::same(Duration::from_secs(60)),
        Periods::same(Duration::from_secs(60)),
        producer,
    )
    .unwrap();

    let waiting = thread::spawn({
        let cache = cache.clone();
        move || cache.get()
    });
    thread::sleep(Duration::from_millis(20));
    assert!(cache.is_refreshing());

    parent.cancel();
    assert_eq!(waiting.join().unwrap(), Err("cancelled".to_owned()));

    assert_eq!(cache.get(), Err("cancelled".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.is_refreshing());
}
