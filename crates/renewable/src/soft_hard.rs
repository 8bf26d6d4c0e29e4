use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Branch, ConfigError};
use crate::metric;
use crate::periods::Periods;
use crate::producer::{Producer, Strategy};
use crate::snapshot::Snapshot;
use crate::utils::defer::defer;
use crate::Renewable;

/// A [`Renewable`] that refreshes in the background while its cached result is stale but
/// still usable.
///
/// Every result has two deadlines, derived from the `soft` and `hard` periods:
///
/// - Before the soft deadline the cached value or error is returned as is.
/// - Between the soft and the hard deadline the cached value or error is still returned
///   immediately, but a background thread is started to produce a new one. At most one such
///   refresh runs at a time.
/// - Past the hard deadline, or before anything was produced, callers block until a new result
///   has been produced. If a refresh is already running they wait for it instead of starting
///   another one.
///
/// Clones share the same cached slot.
pub struct SoftHard<T, E> {
    inner: Arc<Inner<T, E>>,
}

struct Inner<T, E> {
    producer: Producer<T, E>,
    soft: Periods,
    hard: Periods,

    /// The latest published result, swapped as a whole. Loading it never blocks.
    snapshot: ArcSwapOption<Snapshot<T, E>>,

    /// Set while a caller or a background thread owns the right to produce.
    ///
    /// Claiming only needs a successful compare-and-swap. Releasing always happens with
    /// `monitor` locked, followed by a broadcast on `idle`, so waiters cannot miss it.
    refreshing: AtomicBool,
    monitor: Mutex<()>,
    idle: Condvar,
}

impl<T, E> Inner<T, E> {
    fn load(&self) -> Option<Arc<Snapshot<T, E>>> {
        self.snapshot.load_full()
    }

    fn publish(&self, snapshot: Snapshot<T, E>) -> Arc<Snapshot<T, E>> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    fn try_claim(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Blocks until this caller holds the claim.
    fn claim(&self) {
        let mut monitor = self.monitor.lock();
        while !self.try_claim() {
            self.idle.wait(&mut monitor);
        }
    }

    fn release(&self) {
        let monitor = self.monitor.lock();
        self.release_locked(&monitor);
    }

    fn release_locked(&self, _monitor: &MutexGuard<'_, ()>) {
        let was_refreshing = self.refreshing.swap(false, Ordering::AcqRel);
        debug_assert!(was_refreshing, "released a refresh that was never claimed");
        self.idle.notify_all();
    }
}

impl<T, E> SoftHard<T, E> {
    /// Creates a cache that has not produced anything yet.
    ///
    /// Fails if a hard period is shorter than the soft period of the same outcome.
    pub fn new(
        soft: Periods,
        hard: Periods,
        producer: Producer<T, E>,
    ) -> Result<Self, ConfigError> {
        check_periods(&soft, &hard)?;

        Ok(Self {
            inner: Arc::new(Inner {
                producer,
                soft,
                hard,
                snapshot: ArcSwapOption::empty(),
                refreshing: AtomicBool::new(false),
                monitor: Mutex::new(()),
                idle: Condvar::new(),
            }),
        })
    }

    pub fn soft(&self) -> Periods {
        self.inner.soft
    }

    pub fn hard(&self) -> Periods {
        self.inner.hard
    }

    pub fn producer(&self) -> &Producer<T, E> {
        &self.inner.producer
    }

    /// The latest published result, regardless of whether it expired. Never produces.
    pub fn snapshot(&self) -> Option<Arc<Snapshot<T, E>>> {
        self.inner.load()
    }

    /// Whether a production, in the foreground or in the background, is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }
}

/// Ensures that no hard period is shorter than its soft counterpart.
pub(crate) fn check_periods(soft: &Periods, hard: &Periods) -> Result<(), ConfigError> {
    if hard.success < soft.success {
        return Err(ConfigError::HardShorterThanSoft {
            branch: Branch::Success,
            soft: soft.success,
            hard: hard.success,
        });
    }
    if hard.failure < soft.failure {
        return Err(ConfigError::HardShorterThanSoft {
            branch: Branch::Failure,
            soft: soft.failure,
            hard: hard.failure,
        });
    }
    Ok(())
}

impl<T, E> SoftHard<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Starts a background refresh. Must only be called while holding the claim, which is
    /// handed over to the background thread.
    ///
    /// Returns the current snapshot instead if a refresh completed since the caller loaded its
    /// stale one. The claim is released without producing in that case.
    fn refresh_in_background(&self, now: Instant) -> Option<Arc<Snapshot<T, E>>> {
        let inner = &*self.inner;
        let release = defer(|| inner.release());

        if let Some(snapshot) = inner
            .load()
            .filter(|snapshot| snapshot.is_valid_at(now, &inner.soft))
        {
            tracing::debug!(name = inner.producer.name(), "refresh already completed");
            return Some(snapshot);
        }

        let background = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("renewable-refresh:{}", inner.producer.name()))
            .spawn(move || {
                let _release = defer(|| background.release());
                background.publish(background.producer.produce(Strategy::SoftHard));
            });

        match spawned {
            Ok(_) => {
                release.cancel();
                tracing::debug!(name = inner.producer.name(), "spawned background refresh");
                metric!(
                    counter("renewable.refresh.spawned") += 1,
                    "name" => inner.producer.name(),
                );
            }
            Err(error) => {
                tracing::error!(
                    name = inner.producer.name(),
                    error = &error as &dyn std::error::Error,
                    "failed to spawn background refresh"
                );
            }
        }

        None
    }

    fn get_blocking(&self) -> Result<T, E>
    where
        T: Clone,
        E: Clone,
    {
        let inner = &*self.inner;
        metric!(
            counter("renewable.get") += 1,
            "strategy" => Strategy::SoftHard.as_str(),
            "freshness" => "blocking",
        );

        inner.claim();
        let _release = defer(|| inner.release());

        // whoever held the claim before us may have just published a fresh result
        let now = Instant::now();
        if let Some(snapshot) = inner
            .load()
            .filter(|snapshot| snapshot.is_valid_at(now, &inner.soft))
        {
            return snapshot.to_result();
        }

        // a merely hard-valid result is not enough on the blocking path
        inner
            .publish(inner.producer.produce(Strategy::SoftHard))
            .to_result()
    }
}

impl<T, E> Clone for SoftHard<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for SoftHard<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let produced_at = self.inner.load().map(|snapshot| snapshot.produced_at());
        f.debug_struct("SoftHard")
            .field("name", &self.inner.producer.name())
            .field("soft", &self.inner.soft)
            .field("hard", &self.inner.hard)
            .field("produced_at", &produced_at)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl<T, E> Renewable<T, E> for SoftHard<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Result<T, E> {
        let inner = &*self.inner;

        if let Some(snapshot) = inner.load() {
            let now = Instant::now();

            if snapshot.is_valid_at(now, &inner.soft) {
                tracing::trace!(name = inner.producer.name(), freshness = "fresh", "hit");
                metric!(
                    counter("renewable.get") += 1,
                    "strategy" => Strategy::SoftHard.as_str(),
                    "freshness" => "fresh",
                );
                return snapshot.to_result();
            }

            if snapshot.is_valid_at(now, &inner.hard) {
                tracing::trace!(name = inner.producer.name(), freshness = "stale", "hit");
                metric!(
                    counter("renewable.get") += 1,
                    "strategy" => Strategy::SoftHard.as_str(),
                    "freshness" => "stale",
                );
                if inner.try_claim() {
                    if let Some(refreshed) = self.refresh_in_background(now) {
                        return refreshed.to_result();
                    }
                }
                return snapshot.to_result();
            }
        }

        self.get_blocking()
    }
}
