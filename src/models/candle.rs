//! OHLCV candle model.

use serde::{Deserialize, Serialize};

use super::Timeframe;

/// One OHLCV bar. `timestamp` is the bar's open time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Epoch milliseconds at which this bar closes.
    pub fn close_time_ms(&self, timeframe: Timeframe) -> i64 {
        self.timestamp + timeframe.duration_ms()
    }

    /// True once the bar's close time is at or before `cutoff_ms`.
    pub fn is_closed_by(&self, timeframe: Timeframe, cutoff_ms: i64) -> bool {
        self.close_time_ms(timeframe) <= cutoff_ms
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}
