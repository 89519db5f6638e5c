//! Trade signals handed to the signal review service.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timeframe;

/// Direction of a trade signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Higher-timeframe directional bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "UP",
            Trend::Down => "DOWN",
            Trend::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A triggered entry opportunity. Transient: never persisted by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSignal {
    /// Correlation id for logs across the review and execution services
    pub id: String,
    pub instance_id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub side: Side,
    /// Close of the trigger candle
    pub price: f64,
    /// Defined indicator values on the trigger candle
    pub indicators: BTreeMap<String, f64>,
    pub trend: Trend,
    pub created_at: DateTime<Utc>,
}

impl TradeSignal {
    pub fn new(
        instance_id: i64,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        side: Side,
        price: f64,
        indicators: BTreeMap<String, f64>,
        trend: Trend,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id,
            symbol: symbol.into(),
            timeframe,
            side,
            price,
            indicators,
            trend,
            created_at: Utc::now(),
        }
    }
}
