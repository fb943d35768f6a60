use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDirection(pub String);

impl fmt::Display for UnknownDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown direction '{}'", self.0)
    }
}

impl std::error::Error for UnknownDirection {}

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Self::Buy),
            "sell" | "short" => Ok(Self::Sell),
            _ => Err(UnknownDirection(s.to_string())),
        }
    }
}

/// Which adapter delivered a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Foreground,
    Background,
    Push,
    Manual,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Push => "push",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// A trade instruction as delivered by a source. Re-deliveries are new values with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub issued_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub source: SourceTag,
}

impl Signal {
    pub fn new(
        id: impl Into<String>,
        instrument: impl Into<String>,
        direction: Direction,
        source: SourceTag,
    ) -> Self {
        Self {
            id: id.into(),
            instrument: instrument.into(),
            direction,
            entry_price: None,
            take_profit: None,
            stop_loss: None,
            issued_at: None,
            last_updated_at: None,
            source,
        }
    }

    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated_at = Some(at);
        self
    }

    pub fn with_levels(
        mut self,
        entry_price: Option<f64>,
        take_profit: Option<f64>,
        stop_loss: Option<f64>,
    ) -> Self {
        self.entry_price = entry_price;
        self.take_profit = take_profit;
        self.stop_loss = stop_loss;
        self
    }

    /// Latest of `issued_at` and `last_updated_at`, if either is known.
    pub fn freshest_timestamp(&self) -> Option<DateTime<Utc>> {
        match (self.issued_at, self.last_updated_at) {
            (Some(issued), Some(updated)) => Some(issued.max(updated)),
            (issued, updated) => issued.or(updated),
        }
    }
}
