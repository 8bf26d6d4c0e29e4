use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::metric;
use crate::periods::Periods;
use crate::producer::{Producer, Strategy};
use crate::snapshot::Snapshot;
use crate::Renewable;

/// A [`Renewable`] that produces synchronously when its cached result has expired.
///
/// The first [`get`](Renewable::get) always produces. Later calls return the cached value
/// or error as long as it is younger than the matching period. Once it expired, exactly one
/// caller runs the producer while all concurrent callers wait for that production and then
/// share its result.
///
/// Clones share the same cached slot.
pub struct OnDemand<T, E> {
    inner: Arc<Inner<T, E>>,
}

struct Inner<T, E> {
    producer: Producer<T, E>,
    periods: Periods,
    /// Readers hold the lock shared only to check and copy, a producing caller holds it
    /// exclusively for the whole production.
    snapshot: RwLock<Option<Arc<Snapshot<T, E>>>>,
}

impl<T, E> OnDemand<T, E> {
    /// Creates a cache that has not produced anything yet.
    ///
    /// A zero period disables caching for that outcome, so every call observing such a
    /// result produces again.
    pub fn new(periods: Periods, producer: Producer<T, E>) -> Self {
        Self {
            inner: Arc::new(Inner {
                producer,
                periods,
                snapshot: RwLock::new(None),
            }),
        }
    }

    pub fn periods(&self) -> Periods {
        self.inner.periods
    }

    pub fn producer(&self) -> &Producer<T, E> {
        &self.inner.producer
    }

    /// The latest produced result, regardless of whether it expired.
    ///
    /// Waits for a running production to finish but never starts one.
    pub fn snapshot(&self) -> Option<Arc<Snapshot<T, E>>> {
        self.inner.snapshot.read().clone()
    }
}

impl<T, E> Clone for OnDemand<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for OnDemand<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let produced_at = self
            .inner
            .snapshot
            .try_read()
            .and_then(|snapshot| snapshot.as_ref().map(|snapshot| snapshot.produced_at()));
        f.debug_struct("OnDemand")
            .field("name", &self.inner.producer.name())
            .field("periods", &self.inner.periods)
            .field("produced_at", &produced_at)
            .finish()
    }
}

impl<T, E> Renewable<T, E> for OnDemand<T, E>
where
    T: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn get(&self) -> Result<T, E> {
        let inner = &*self.inner;

        {
            let snapshot = inner.snapshot.read();
            if let Some(snapshot) = snapshot.as_ref() {
                if snapshot.is_valid_at(Instant::now(), &inner.periods) {
                    tracing::trace!(name = inner.producer.name(), freshness = "fresh", "hit");
                    metric!(
                        counter("renewable.get") += 1,
                        "strategy" => Strategy::OnDemand.as_str(),
                        "freshness" => "fresh",
                    );
                    return snapshot.to_result();
                }
            }
        }

        let mut snapshot = inner.snapshot.write();
        metric!(
            counter("renewable.get") += 1,
            "strategy" => Strategy::OnDemand.as_str(),
            "freshness" => "blocking",
        );

        // someone else may have produced while we were waiting for the write lock
        let now = Instant::now();
        if let Some(snapshot) = snapshot
            .as_ref()
            .filter(|snapshot| snapshot.is_valid_at(now, &inner.periods))
        {
            return snapshot.to_result();
        }

        // the write guard is released on unwind, so a panicking producer leaves the
        // previous snapshot in place for the next caller to retry
        let produced = inner.producer.produce(Strategy::OnDemand);
        let result = produced.to_result();
        *snapshot = Some(Arc::new(produced));
        result
    }
}
