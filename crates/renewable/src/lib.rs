//! Single-value caches that renew their content once it expires.
//!
//! A [`Renewable`] wraps a production function, for example fetching a remote configuration,
//! and hands out copies of its last result until that result expires. Successful results and
//! errors are cached alike, but each expires after its own period (see [`Periods`]).
//!
//! Two strategies are available:
//!
//! - [`OnDemand`] produces synchronously whenever a caller finds the result expired. Concurrent
//!   callers wait for that single production instead of starting their own.
//! - [`SoftHard`] keeps serving a stale result between its soft and hard deadline while a
//!   background thread refreshes it, and only blocks callers once the hard deadline passed.
//!
//! Both strategies guarantee that at most one production runs at a time.
//!
//! ```
//! use std::time::Duration;
//!
//! use renewable::{OnDemand, Periods, Producer, Renewable};
//!
//! let cache = OnDemand::new(
//!     Periods::new(Duration::from_secs(60), Duration::from_secs(5)),
//!     Producer::new(|| Ok::<_, String>("config".to_owned())),
//! );
//! assert_eq!(cache.get().as_deref(), Ok("config"));
//! ```

use std::fmt;

pub mod config;
pub mod metrics;

mod error;
mod on_demand;
mod periods;
mod producer;
mod snapshot;
mod soft_hard;
mod utils;

pub use error::{Branch, ConfigError};
pub use on_demand::OnDemand;
pub use periods::Periods;
pub use producer::Producer;
pub use snapshot::Snapshot;
pub use soft_hard::SoftHard;
pub use tokio_util::sync::CancellationToken;

/// A cached value that renews itself according to its refresh strategy.
///
/// It is always safe to call [`get`](Self::get) concurrently from any number of threads.
pub trait Renewable<T, E>: Send + Sync {
    /// Returns the cached result, producing a new one first if the strategy requires it.
    ///
    /// Errors of the production function are returned as they are.
    fn get(&self) -> Result<T, E>;

    /// Returns the cached value, panicking if the cached result is an error.
    ///
    /// Meant for callers that cannot proceed without a value at all.
    fn get_or_panic(&self) -> T
    where
        E: fmt::Display,
    {
        match self.get() {
            Ok(value) => value,
            Err(err) => panic!("failed to produce value: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    #[should_panic(expected = "failed to produce value: upstream unavailable")]
    fn test_get_or_panic() {
        let cache = OnDemand::<(), _>::new(
            Periods::same(Duration::from_secs(60)),
            Producer::new(|| Err("upstream unavailable")),
        );
        cache.get_or_panic();
    }

    #[test]
    fn test_trait_objects() {
        let caches: Vec<Box<dyn Renewable<u32, String>>> = vec![
            Box::new(OnDemand::new(Periods::default(), Producer::new(|| Ok(1)))),
            Box::new(
                SoftHard::new(Periods::default(), Periods::default(), Producer::new(|| Ok(2)))
                    .unwrap(),
            ),
        ];
        let values: Vec<_> = caches.iter().map(|cache| cache.get_or_panic()).collect();
        assert_eq!(values, [1, 2]);
    }
}
