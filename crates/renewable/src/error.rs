use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// One of the two outcomes a [`Periods`](crate::Periods) value distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Success,
    Failure,
}

impl AsRef<str> for Branch {
    fn as_ref(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// An invalid combination of construction parameters.
///
/// Misconfiguration is detected when a cache is created and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A hard period is shorter than the soft period of the same branch.
    #[error("{branch} hard period must be equal or greater than soft: {hard:?} < {soft:?}")]
    HardShorterThanSoft {
        branch: Branch,
        soft: Duration,
        hard: Duration,
    },
}
