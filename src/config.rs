use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::executor::iceberg::IcebergConfig;
use crate::executor::twap::TwapConfig;
use crate::executor::vwap::VwapConfig;
use crate::risk::TriggerLimits;

/// Top-level configuration bundle, one section per algorithm. Each
/// algorithm config carries its own `Default`; `Settings` only
/// overrides what a deployment's config file or environment actually
/// sets.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub twap: TwapConfig,
    #[serde(default)]
    pub vwap: VwapConfig,
    #[serde(default)]
    pub iceberg: IcebergConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub daily_loss_pct_limit: f64,
    pub position_loss_pct_limit: f64,
    pub margin_usage_pct_limit: f64,
    pub consecutive_losses_limit: u32,
    pub operator_secret: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let defaults = TriggerLimits::default();
        Self {
            daily_loss_pct_limit: defaults.daily_loss_pct_limit,
            position_loss_pct_limit: defaults.position_loss_pct_limit,
            margin_usage_pct_limit: defaults.margin_usage_pct_limit,
            consecutive_losses_limit: defaults.consecutive_losses_limit,
            operator_secret: String::new(),
        }
    }
}

impl From<&RiskConfig> for TriggerLimits {
    fn from(c: &RiskConfig) -> Self {
        TriggerLimits {
            daily_loss_pct_limit: c.daily_loss_pct_limit,
            position_loss_pct_limit: c.position_loss_pct_limit,
            margin_usage_pct_limit: c.margin_usage_pct_limit,
            consecutive_losses_limit: c.consecutive_losses_limit,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/.algo-exec/config", home)).required(false))
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("ALGO_EXEC").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_to_trigger_limits() {
        let risk = RiskConfig::default();
        let limits: TriggerLimits = (&risk).into();
        assert_eq!(limits.consecutive_losses_limit, 5);
        assert!((limits.daily_loss_pct_limit - 0.03).abs() < 1e-9);
    }
}
