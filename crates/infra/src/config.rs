//! Runtime configuration read from the environment.

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use stockledger_inventory::{RemovalStrategy, WarehouseConfig};
use stockledger_observability::{LogConfig, LogFormat};

pub const REMOVAL_STRATEGY_VAR: &str = "STOCK_REMOVAL_STRATEGY";
pub const LOSS_LOCATION_NAME_VAR: &str = "STOCK_LOSS_LOCATION_NAME";
pub const LOG_FORMAT_VAR: &str = "STOCK_LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Settings of one stock service process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    pub removal_strategy: RemovalStrategy,
    pub loss_location_name: String,
    pub log_format: LogFormat,
}

impl Default for StockConfig {
    fn default() -> Self {
        let warehouse = WarehouseConfig::default();
        Self {
            removal_strategy: warehouse.removal_strategy,
            loss_location_name: warehouse.loss_location_name,
            log_format: LogFormat::Json,
        }
    }
}

impl StockConfig {
    /// Build the configuration from a variable lookup.
    ///
    /// Unset variables fall back to their default with a warning; values
    /// that are set but malformed are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let removal_strategy = match lookup(REMOVAL_STRATEGY_VAR) {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: REMOVAL_STRATEGY_VAR,
                reason,
            })?,
            None => {
                tracing::warn!(
                    "{REMOVAL_STRATEGY_VAR} not set; using {:?}",
                    defaults.removal_strategy
                );
                defaults.removal_strategy
            }
        };

        let loss_location_name = match lookup(LOSS_LOCATION_NAME_VAR) {
            Some(raw) if raw.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    var: LOSS_LOCATION_NAME_VAR,
                    reason: "location name cannot be empty".to_string(),
                });
            }
            Some(raw) => raw.trim().to_string(),
            None => {
                tracing::warn!(
                    "{LOSS_LOCATION_NAME_VAR} not set; using '{}'",
                    defaults.loss_location_name
                );
                defaults.loss_location_name
            }
        };

        let log_format = match lookup(LOG_FORMAT_VAR) {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: LOG_FORMAT_VAR,
                reason,
            })?,
            None => defaults.log_format,
        };

        Ok(Self {
            removal_strategy,
            loss_location_name,
            log_format,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Process-edge loader: defaults for unset variables, a contextual
    /// error for malformed ones.
    pub fn from_env_or_default() -> anyhow::Result<Self> {
        Self::from_env().context("failed to load stock configuration from the environment")
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig {
            removal_strategy: self.removal_strategy,
            loss_location_name: self.loss_location_name.clone(),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::default().with_format(self.log_format)
    }

    /// Install the process-wide tracing subscriber for this configuration.
    pub fn init_logging(&self) -> anyhow::Result<()> {
        stockledger_observability::try_init(&self.log_config())
            .context("failed to initialize logging")
    }
}
