use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// How long a produced result stays valid, depending on its outcome.
///
/// A zero period means the corresponding result is never reused, so every
/// [`get`](crate::Renewable::get) observing it produces again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Periods {
    /// Validity of a successful result.
    pub success: Duration,
    /// Validity of a failed result.
    pub failure: Duration,
}

impl Periods {
    pub const fn new(success: Duration, failure: Duration) -> Self {
        Self { success, failure }
    }

    /// Periods that treat successes and failures alike.
    pub const fn same(period: Duration) -> Self {
        Self::new(period, period)
    }

    /// Selects the period that applies to `result`.
    pub fn period_for<T, E>(&self, result: &Result<T, E>) -> Duration {
        if result.is_err() {
            self.failure
        } else {
            self.success
        }
    }
}

#[derive(Deserialize)]
struct RawPeriods {
    #[serde(with = "humantime_serde")]
    success: Duration,
    #[serde(default, with = "humantime_serde")]
    failure: Option<Duration>,
}

impl<'de> Deserialize<'de> for Periods {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPeriods::deserialize(deserializer)?;
        Ok(Periods {
            success: raw.success,
            failure: raw.failure.unwrap_or(raw.success),
        })
    }
}
