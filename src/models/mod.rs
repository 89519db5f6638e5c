//! Data models for instances, candles, timeframes and signals.

mod candle;
mod instance;
mod signal;
mod timeframe;

pub use candle::Candle;
pub use instance::{Instance, InstanceStatus, MarketType, NewInstance, StrategyConfig};
pub use signal::{Side, TradeSignal, Trend};
pub use timeframe::{TimeUnit, Timeframe};
