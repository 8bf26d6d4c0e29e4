//! Helpers for testing renewable caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - The timing scenarios sleep right before and right after period boundaries. They keep a
//!    distance of [`SAFE_CHECK_PERIOD`] to every boundary, which has to absorb scheduling delays.
//!    Do not run them on heavily overloaded machines.
//!
//!  - The scenario runners only need a `get` function, so they work with any cache that is fed
//!    by an [`Alternating`] producer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Validity of successful results in the timing scenarios.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(75);
/// Validity of failed results in the timing scenarios.
pub const ERROR_PERIOD: Duration = Duration::from_millis(100);
/// Minimal distance kept between a check and a period boundary.
pub const SAFE_CHECK_PERIOD: Duration = Duration::from_millis(25);

const _: () = {
    let safe = SAFE_CHECK_PERIOD.as_millis();
    let default = DEFAULT_PERIOD.as_millis();
    let error = ERROR_PERIOD.as_millis();

    assert!(safe > 0);
    assert!(default >= safe * 3);
    assert!(error >= safe * 3);
    // the scenarios need to tell both periods apart
    assert!(default.abs_diff(error) >= safe);
};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `renewable` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("renewable=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

#[derive(Debug, Default)]
struct AlternatingState {
    calls: AtomicU64,
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
}

/// A production function that alternates between successes and failures.
///
/// Production `2 * i` returns `Ok(i)` and production `2 * i + 1` returns `Err(i.to_string())`.
/// It also records whether it was ever invoked while another invocation was still running.
#[derive(Clone, Debug, Default)]
pub struct Alternating {
    state: Arc<AlternatingState>,
    delay: Duration,
}

impl Alternating {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every production take at least `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The number of started productions.
    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// The number of productions that overlapped with another one.
    pub fn overlaps(&self) -> usize {
        self.state.overlaps.load(Ordering::SeqCst)
    }

    /// Returns the production function itself.
    pub fn producer(&self) -> impl Fn() -> Result<u64, String> + Send + Sync + 'static {
        let state = Arc::clone(&self.state);
        let delay = self.delay;

        move || {
            let i = state.enter(delay);
            if i % 2 == 0 {
                Ok(i / 2)
            } else {
                Err(format!("{}", (i - 1) / 2))
            }
        }
    }

    /// Returns a production function that alternates the same way, but yields the [`Instant`]
    /// each production finished at, as value or as error.
    pub fn stamping_producer(
        &self,
    ) -> impl Fn() -> Result<Instant, Instant> + Send + Sync + 'static {
        let state = Arc::clone(&self.state);
        let delay = self.delay;

        move || {
            let i = state.enter(delay);
            let now = Instant::now();
            if i % 2 == 0 { Ok(now) } else { Err(now) }
        }
    }
}

impl AlternatingState {
    /// Records one production and returns its index.
    fn enter(&self, delay: Duration) -> u64 {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.in_flight.store(false, Ordering::SeqCst);
        i
    }
}

/// Checks the alternating results of a single caller right before and after every boundary.
///
/// `get` must be backed by `producer`, configured with [`DEFAULT_PERIOD`] and [`ERROR_PERIOD`].
pub fn assert_alternating_sequence<G>(get: G, producer: &Alternating, iterations: u64)
where
    G: Fn() -> Result<u64, String>,
{
    thread::sleep(SAFE_CHECK_PERIOD);
    assert_eq!(producer.calls(), 0, "nothing must be produced before the first get");

    for i in 0..iterations {
        assert_eq!(get(), Ok(i));
        assert_eq!(producer.calls(), i * 2 + 1);

        if i > 0 {
            thread::sleep(DEFAULT_PERIOD - 2 * SAFE_CHECK_PERIOD);
        } else {
            thread::sleep(DEFAULT_PERIOD - SAFE_CHECK_PERIOD);
        }

        assert_eq!(get(), Ok(i));
        assert_eq!(producer.calls(), i * 2 + 1);

        thread::sleep(2 * SAFE_CHECK_PERIOD);

        assert_eq!(get(), Err(i.to_string()));
        assert_eq!(producer.calls(), i * 2 + 2);

        thread::sleep(ERROR_PERIOD - 2 * SAFE_CHECK_PERIOD);

        assert_eq!(get(), Err(i.to_string()));
        assert_eq!(producer.calls(), i * 2 + 2);

        thread::sleep(2 * SAFE_CHECK_PERIOD);
    }

    assert_eq!(producer.overlaps(), 0);
}

/// Runs the alternating checks from several threads while other threads hammer `get`.
///
/// The busy threads make sure that new results are produced right at every boundary, so the
/// checking threads observe the same sequence as a single caller would.
pub fn assert_alternating_sequence_concurrently<G>(
    get: G,
    producer: &Alternating,
    iterations: u64,
) where
    G: Fn() -> Result<u64, String> + Clone + Send + 'static,
{
    const BUSY_READERS: usize = 2;
    const CHECKING_READERS: usize = 4;

    thread::sleep(SAFE_CHECK_PERIOD);
    assert_eq!(producer.calls(), 0, "nothing must be produced before the first get");

    let done = Arc::new(AtomicBool::new(false));

    let busy: Vec<_> = (0..BUSY_READERS)
        .map(|_| {
            let get = get.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let _ = get();
                    thread::yield_now();
                }
            })
        })
        .collect();

    let checking: Vec<_> = (0..CHECKING_READERS)
        .map(|_| {
            let get = get.clone();
            thread::spawn(move || {
                for i in 0..iterations {
                    assert_eq!(get(), Ok(i));

                    if i > 0 {
                        thread::sleep(DEFAULT_PERIOD - 2 * SAFE_CHECK_PERIOD);
                    } else {
                        thread::sleep(DEFAULT_PERIOD - SAFE_CHECK_PERIOD);
                    }

                    assert_eq!(get(), Ok(i));
                    thread::sleep(2 * SAFE_CHECK_PERIOD);
                    assert_eq!(get(), Err(i.to_string()));
                    thread::sleep(ERROR_PERIOD - 2 * SAFE_CHECK_PERIOD);
                    assert_eq!(get(), Err(i.to_string()));

                    if i < iterations - 1 {
                        thread::sleep(2 * SAFE_CHECK_PERIOD);
                    }
                }
            })
        })
        .collect();

    let results: Vec<_> = checking.into_iter().map(|handle| handle.join()).collect();
    done.store(true, Ordering::Relaxed);
    for handle in busy {
        handle.join().expect("busy reader panicked");
    }
    for result in results {
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    assert_eq!(producer.overlaps(), 0);
}

/// How [`poll_ages`] polls a cache.
#[derive(Clone, Copy, Debug)]
pub struct Polling {
    /// The number of concurrent readers.
    pub readers: usize,
    /// The pause between two calls of the same reader.
    pub interval: Duration,
    /// How long every reader keeps polling.
    pub duration: Duration,
}

/// The oldest results [`poll_ages`] accepts, per outcome.
#[derive(Clone, Copy, Debug)]
pub struct MaxAge {
    pub success: Duration,
    pub failure: Duration,
}

/// Polls `get` from several threads and returns the longest observed latency.
///
/// Each value or error must be the [`Instant`] it was produced at. Panics if any returned
/// result is at least as old as the matching `max_age` at the time `get` was called. Prime the
/// cache before polling, otherwise the initial production counts as the slowest call.
pub fn poll_ages<G>(get: G, polling: Polling, max_age: MaxAge) -> Duration
where
    G: Fn() -> Result<Instant, Instant> + Clone + Send + 'static,
{
    let handles: Vec<_> = (0..polling.readers)
        .map(|_| {
            let get = get.clone();
            thread::spawn(move || {
                let end = Instant::now() + polling.duration;
                let mut slowest = Duration::ZERO;

                while Instant::now() < end {
                    let before = Instant::now();
                    let result = get();
                    slowest = slowest.max(before.elapsed());

                    let (produced_at, max_age, outcome) = match result {
                        Ok(produced_at) => (produced_at, max_age.success, "successful"),
                        Err(produced_at) => (produced_at, max_age.failure, "failed"),
                    };
                    let age = before.saturating_duration_since(produced_at);
                    assert!(age < max_age, "served a {outcome} result that is {age:?} old");

                    thread::sleep(polling.interval);
                }
                slowest
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.join().expect("polling reader panicked"))
        .max()
        .unwrap_or_default()
}
