use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigError;
use crate::models::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    #[default]
    Follow,
    Invert,
    BuyOnly,
    SellOnly,
}

impl DirectionPolicy {
    /// Direction to trade for a signal, or `None` when the policy filters it out.
    pub fn resolve(self, signal: Direction) -> Option<Direction> {
        match (self, signal) {
            (Self::Follow, d) => Some(d),
            (Self::Invert, d) => Some(d.opposite()),
            (Self::BuyOnly, Direction::Buy) | (Self::SellOnly, Direction::Sell) => Some(signal),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub server: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}

fn default_order_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfig {
    pub instrument: String,
    pub lot_size: f64,
    #[serde(default = "default_order_count")]
    pub order_count: u32,
    #[serde(default)]
    pub direction_policy: DirectionPolicy,
    pub platform: String,
    pub account: Credentials,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Read-only lookup of execution parameters, supplied by whoever owns account records.
pub trait TradeConfigLookup: Send + Sync {
    fn resolve(&self, instrument: &str) -> Option<TradeConfig>;
}

/// Uppercases and drops the separators sources like to put in symbol names.
pub fn normalize_instrument(instrument: &str) -> String {
    instrument
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' ' | '.'))
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct StaticConfigLookup {
    by_instrument: HashMap<String, TradeConfig>,
}

impl StaticConfigLookup {
    /// Later entries win when two configurations normalise to the same instrument.
    pub fn new(configs: impl IntoIterator<Item = TradeConfig>) -> Self {
        let mut by_instrument = HashMap::new();
        for config in configs {
            let key = normalize_instrument(&config.instrument);
            if let Some(previous) = by_instrument.insert(key.clone(), config) {
                warn!(
                    "Duplicate trade configuration for {} ({}), keeping the later entry",
                    key, previous.instrument
                );
            }
        }
        Self { by_instrument }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let configs: Vec<TradeConfig> =
            serde_json::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        if let Some(bad) = configs.iter().find(|c| c.order_count == 0 || c.lot_size <= 0.0) {
            return Err(ConfigError::Invalid {
                key: format!("trade config '{}'", bad.instrument),
                reason: "order_count and lot_size must be positive".to_string(),
            });
        }
        Ok(Self::new(configs))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.by_instrument.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_instrument.is_empty()
    }
}

impl TradeConfigLookup for StaticConfigLookup {
    fn resolve(&self, instrument: &str) -> Option<TradeConfig> {
        self.by_instrument
            .get(&normalize_instrument(instrument))
            .cloned()
    }
}
