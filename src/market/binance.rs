//! Binance public REST market data, spot and USD-M futures.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::{Candle, MarketType, Timeframe};

use super::rest::{collect_tickers, parse_number, RawTicker, RestClient, SymbolMap};
use super::{MarketDataClient, Ticker};

const SPOT_API_BASE: &str = "https://api.binance.com/api/v3";
const FUTURES_API_BASE: &str = "https://fapi.binance.com/fapi/v1";
const MAX_KLINES: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    quote_volume: String,
}

pub struct BinanceClient {
    rest: RestClient,
    market_type: MarketType,
    symbols: RwLock<SymbolMap>,
}

impl BinanceClient {
    pub fn new(market_type: MarketType) -> Result<Self> {
        let base_url = match market_type {
            MarketType::Spot => SPOT_API_BASE,
            MarketType::Futures => FUTURES_API_BASE,
        };
        Ok(Self {
            rest: RestClient::new(base_url)?,
            market_type,
            symbols: RwLock::new(SymbolMap::default()),
        })
    }

    async fn market_id(&self, symbol: &str) -> String {
        self.symbols.read().await.id_for(symbol, "")
    }
}

/// `[openTime, open, high, low, close, volume, closeTime, ...]`
fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(anyhow!("kline row has {} fields", row.len()));
    }
    let timestamp = row[0]
        .as_i64()
        .ok_or_else(|| anyhow!("bad kline open time: {}", row[0]))?;
    Ok(Candle {
        timestamp,
        open: parse_number(&row[1])?,
        high: parse_number(&row[2])?,
        low: parse_number(&row[3])?,
        close: parse_number(&row[4])?,
        volume: parse_number(&row[5])?,
    })
}

fn build_symbol_map(info: ExchangeInfo) -> SymbolMap {
    let mut map = SymbolMap::default();
    for s in info.symbols.into_iter().filter(|s| s.status == "TRADING") {
        map.insert(&s.base_asset, &s.quote_asset, s.symbol);
    }
    map
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    fn exchange(&self) -> &str {
        "binance"
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    async fn load_markets(&self) -> Result<usize> {
        let info: ExchangeInfo = self.rest.get_json("exchangeInfo", &[]).await?;
        let map = build_symbol_map(info);
        let count = map.len();
        *self.symbols.write().await = map;
        Ok(count)
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let mut query = vec![
            ("symbol", self.market_id(symbol).await),
            ("interval", timeframe.to_string()),
            ("limit", limit.clamp(1, MAX_KLINES).to_string()),
        ];
        if let Some(since) = since {
            query.push(("startTime", since.to_string()));
        }

        let rows: Vec<Vec<Value>> = self.rest.get_json("klines", &query).await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }

    async fn fetch_tickers(&self, symbols: Option<&[String]>) -> Result<HashMap<String, Ticker>> {
        let items: Vec<TickerResponse> = self.rest.get_json("ticker/24hr", &[]).await?;
        let map = self.symbols.read().await;

        let raw = items.iter().map(|t| RawTicker {
            id: &t.symbol,
            last: Some(t.last_price.as_str()),
            change_pct: t.price_change_percent.parse().ok(),
            quote_volume: Some(t.quote_volume.as_str()),
        });
        Ok(collect_tickers(&map, raw, symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kline_row() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
                "148976.11427815", 1499644799999, "2434.19055334", 308, "1756.87402397",
                "28.46694368", "0"]"#,
        )
        .unwrap();
        let candle = parse_kline(&row).unwrap();
        assert_eq!(candle.timestamp, 1_499_040_000_000);
        assert_eq!(candle.high, 0.8);
        assert!((candle.volume - 148_976.114_278_15).abs() < 1e-9);
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row: Vec<Value> = serde_json::from_str(r#"[1, "1", "1"]"#).unwrap();
        assert!(parse_kline(&row).is_err());
    }

    #[test]
    fn test_symbol_map_skips_halted_markets() {
        let info: ExchangeInfo = serde_json::from_str(
            r#"{"symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT"},
                {"symbol": "LUNAUSDT", "status": "BREAK", "baseAsset": "LUNA", "quoteAsset": "USDT"}
            ]}"#,
        )
        .unwrap();
        let map = build_symbol_map(info);
        assert_eq!(map.id_for("BTC/USDT", ""), "BTCUSDT");
        assert_eq!(map.unified("BTCUSDT").map(String::as_str), Some("BTC/USDT"));
        assert!(map.unified("LUNAUSDT").is_none());
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_market_id_falls_back_without_metadata() {
        let client = BinanceClient::new(MarketType::Spot).unwrap();
        assert_eq!(client.market_id("ETH/USDT").await, "ETHUSDT");
    }
}
