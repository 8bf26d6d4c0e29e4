use std::time::Instant;

use crate::periods::Periods;

/// The outcome of a single production, stamped with the time it finished.
///
/// Snapshots are never modified after creation. A new production always publishes a new
/// snapshot, so readers holding an older one keep seeing consistent data.
#[derive(Debug, Clone)]
pub struct Snapshot<T, E> {
    result: Result<T, E>,
    produced_at: Instant,
}

impl<T, E> Snapshot<T, E> {
    pub fn new(result: Result<T, E>, produced_at: Instant) -> Self {
        Self {
            result,
            produced_at,
        }
    }

    pub fn result(&self) -> &Result<T, E> {
        &self.result
    }

    pub fn produced_at(&self) -> Instant {
        self.produced_at
    }

    /// Whether this snapshot may still be served at `now` according to `periods`.
    ///
    /// A deadline that does not fit into an [`Instant`] never passes.
    pub fn is_valid_at(&self, now: Instant, periods: &Periods) -> bool {
        match self
            .produced_at
            .checked_add(periods.period_for(&self.result))
        {
            Some(deadline) => deadline > now,
            None => true,
        }
    }
}

impl<T: Clone, E: Clone> Snapshot<T, E> {
    /// A copy of the cached value or error.
    pub fn to_result(&self) -> Result<T, E> {
        self.result.clone()
    }
}
