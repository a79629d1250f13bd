// 7.0 config.rs: exchange-wide settings in one place. matching bounds, event retention,
// on-chain anchoring. per-market settings live on MarketConfig.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    // Fills produced per matching invocation
    pub default_max_matches: usize,
    // Events retained in memory; oldest are dropped beyond this
    pub max_events: usize,
    // Queue trades for the chain broadcaster after settlement
    pub anchor_onchain: bool,
    // Trades handed to the broadcaster per queue drain
    pub settlement_batch_size: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            default_max_matches: 10,
            max_events: 100_000,
            anchor_onchain: true,
            settlement_batch_size: 50,
        }
    }
}

impl ExchangeConfig {
    // Local runs: no chain, small event log
    pub fn development() -> Self {
        Self {
            max_events: 10_000,
            anchor_onchain: false,
            ..Self::default()
        }
    }

    pub fn testnet() -> Self {
        Self {
            settlement_batch_size: 10,
            ..Self::default()
        }
    }

    // Larger batches and a deeper audit trail
    pub fn production() -> Self {
        Self {
            max_events: 1_000_000,
            settlement_batch_size: 200,
            ..Self::default()
        }
    }

    /// Start from `base` and apply any `EXCHANGE_*` overrides present in the environment.
    pub fn from_env(base: ExchangeConfig) -> Result<Self, ConfigError> {
        let config = Self {
            default_max_matches: read_env_or_default("EXCHANGE_MAX_MATCHES", base.default_max_matches)?,
            max_events: read_env_or_default("EXCHANGE_MAX_EVENTS", base.max_events)?,
            anchor_onchain: read_env_or_default("EXCHANGE_ANCHOR_ONCHAIN", base.anchor_onchain)?,
            settlement_batch_size: read_env_or_default("EXCHANGE_SETTLEMENT_BATCH", base.settlement_batch_size)?,
        };
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_matches == 0 {
            return Err(ConfigError::InvalidMatching {
                reason: "max matches must be at least 1".to_string(),
            });
        }

        if self.settlement_batch_size == 0 {
            return Err(ConfigError::InvalidSettlement {
                reason: "settlement batch size must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

fn read_env_or_default<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv { key, value }),
        Err(_) => Ok(default),
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid matching config: {reason}")]
    InvalidMatching { reason: String },

    #[error("Invalid settlement config: {reason}")]
    InvalidSettlement { reason: String },

    #[error("Cannot parse {key}={value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

impl Environment {
    pub fn config(&self) -> ExchangeConfig {
        match self {
            Environment::Development => ExchangeConfig::development(),
            Environment::Testnet => ExchangeConfig::testnet(),
            Environment::Production => ExchangeConfig::production(),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidEnv {
                key: "EXCHANGE_ENV",
                value: s.to_string(),
            }),
        }
    }
}
