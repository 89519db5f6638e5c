//! Market-data capability required from any exchange integration.

mod binance;
mod gateio;
mod kucoin;
mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Candle, MarketType, Timeframe};

pub use binance::BinanceClient;
pub use gateio::GateioClient;
pub use kucoin::KucoinClient;

/// 24h ticker summary for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    /// 24h change in percent
    pub change_pct: f64,
    pub quote_volume: f64,
}

/// Read-only market data. Shared across instances, so implementations must
/// be safe for concurrent use.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    fn exchange(&self) -> &str;

    fn market_type(&self) -> MarketType;

    /// Load exchange metadata. Returns the number of tradable markets.
    async fn load_markets(&self) -> Result<usize>;

    /// Candles with open time `>= since` (most recent `limit` when `None`),
    /// ascending by open time.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Candle>>;

    /// Tickers keyed by unified symbol, optionally restricted to `symbols`.
    async fn fetch_tickers(&self, symbols: Option<&[String]>) -> Result<HashMap<String, Ticker>>;

    fn timeframe_duration(&self, timeframe: Timeframe) -> i64 {
        timeframe.duration_secs()
    }
}

/// Builds market-data clients for the registry's client pool.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, exchange: &str, market_type: MarketType) -> Result<Arc<dyn MarketDataClient>>;
}

/// Factory for the exchanges this build can talk to.
#[derive(Debug, Clone, Default)]
pub struct DefaultClientFactory;

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    async fn create(&self, exchange: &str, market_type: MarketType) -> Result<Arc<dyn MarketDataClient>> {
        match exchange.to_lowercase().as_str() {
            "binance" => Ok(Arc::new(BinanceClient::new(market_type)?)),
            "kucoin" => Ok(Arc::new(KucoinClient::new(market_type)?)),
            "gateio" | "gate" => Ok(Arc::new(GateioClient::new(market_type)?)),
            other => bail!("unsupported exchange: {}", other),
        }
    }
}
