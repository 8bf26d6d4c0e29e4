//! Building caches from configuration files.
//!
//! A configuration selects the refresh strategy and its periods. Durations use the
//! [`humantime`](humantime_serde) format:
//!
//! ```yaml
//! name: remote-config
//! strategy: soft_hard
//! soft:
//!   success: 75ms
//!   failure: 100ms
//! hard:
//!   success: 150ms
//!   failure: 200ms
//! ```
//!
//! A missing `failure` period defaults to the `success` period.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::on_demand::OnDemand;
use crate::periods::Periods;
use crate::producer::Producer;
use crate::soft_hard::{SoftHard, check_periods};
use crate::Renewable;

/// The refresh strategy of a cache, see [`OnDemand`] and [`SoftHard`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Produce synchronously once the result expired.
    OnDemand { periods: Periods },
    /// Refresh in the background after the soft deadline, block after the hard one.
    SoftHard { soft: Periods, hard: Periods },
}

/// Configuration of a single cache.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RenewableConfig {
    /// Overrides the producer name used in logs and metrics.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub strategy: StrategyConfig,
}

impl Default for RenewableConfig {
    fn default() -> Self {
        Self {
            name: None,
            strategy: StrategyConfig::OnDemand {
                periods: Periods::same(Duration::from_secs(1)),
            },
        }
    }
}

impl RenewableConfig {
    /// Loads the configuration from `path`, or returns the default one.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Self::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self = serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the constraints between periods that deserialization cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.strategy {
            StrategyConfig::OnDemand { .. } => Ok(()),
            StrategyConfig::SoftHard { soft, hard } => check_periods(soft, hard),
        }
    }

    /// Creates the configured cache around `producer`.
    pub fn build<T, E>(
        &self,
        producer: Producer<T, E>,
    ) -> Result<Box<dyn Renewable<T, E>>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let producer = match &self.name {
            Some(name) => producer.named(name.clone()),
            None => producer,
        };

        Ok(match &self.strategy {
            StrategyConfig::OnDemand { periods } => Box::new(OnDemand::new(*periods, producer)),
            StrategyConfig::SoftHard { soft, hard } => {
                Box::new(SoftHard::new(*soft, *hard, producer)?)
            }
        })
    }
}
