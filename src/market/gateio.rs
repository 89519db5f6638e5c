//! Gate.io public REST market data (API v4), spot only.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::{Candle, MarketType, TimeUnit, Timeframe};

use super::rest::{collect_tickers, parse_number, parse_secs_as_ms, window, RawTicker, RestClient, SymbolMap};
use super::{MarketDataClient, Ticker};

const API_BASE: &str = "https://api.gateio.ws/api/v4";
const MAX_CANDLES: u32 = 1000;

#[derive(Debug, Deserialize)]
struct CurrencyPair {
    id: String,
    base: String,
    quote: String,
    trade_status: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    currency_pair: String,
    last: Option<String>,
    change_percentage: Option<String>,
    quote_volume: Option<String>,
}

pub struct GateioClient {
    rest: RestClient,
    symbols: RwLock<SymbolMap>,
}

impl GateioClient {
    pub fn new(market_type: MarketType) -> Result<Self> {
        if market_type != MarketType::Spot {
            bail!("gateio supports spot market data only");
        }
        Ok(Self {
            rest: RestClient::new(API_BASE)?,
            symbols: RwLock::new(SymbolMap::default()),
        })
    }

    async fn market_id(&self, symbol: &str) -> String {
        self.symbols.read().await.id_for(symbol, "_")
    }
}

fn interval(timeframe: Timeframe) -> Result<String> {
    let n = timeframe.count();
    match (timeframe.unit(), n) {
        (TimeUnit::Minute, 1 | 5 | 15 | 30) => Ok(format!("{}m", n)),
        (TimeUnit::Hour, 1 | 4 | 8) => Ok(format!("{}h", n)),
        (TimeUnit::Day, 1 | 7) => Ok(format!("{}d", n)),
        (TimeUnit::Week, 1) => Ok("7d".to_string()),
        _ => bail!("gateio has no {} candles", timeframe),
    }
}

/// `[time, quote volume, close, high, low, open, base volume, closed]`,
/// time in seconds.
fn parse_candle(row: &[Value]) -> Result<Candle> {
    if row.len() < 7 {
        return Err(anyhow!("candle row has {} fields", row.len()));
    }
    Ok(Candle {
        timestamp: parse_secs_as_ms(&row[0])?,
        close: parse_number(&row[2])?,
        high: parse_number(&row[3])?,
        low: parse_number(&row[4])?,
        open: parse_number(&row[5])?,
        volume: parse_number(&row[6])?,
    })
}

fn raw_ticker(t: &TickerResponse) -> RawTicker<'_> {
    RawTicker {
        id: &t.currency_pair,
        last: t.last.as_deref(),
        change_pct: t.change_percentage.as_deref().and_then(|c| c.parse().ok()),
        quote_volume: t.quote_volume.as_deref(),
    }
}

fn build_symbol_map(pairs: Vec<CurrencyPair>) -> SymbolMap {
    let mut map = SymbolMap::default();
    for p in pairs.into_iter().filter(|p| p.trade_status == "tradable") {
        map.insert(&p.base, &p.quote, p.id);
    }
    map
}

#[async_trait]
impl MarketDataClient for GateioClient {
    fn exchange(&self) -> &str {
        "gateio"
    }

    fn market_type(&self) -> MarketType {
        MarketType::Spot
    }

    async fn load_markets(&self) -> Result<usize> {
        let pairs: Vec<CurrencyPair> = self.rest.get_json("spot/currency_pairs", &[]).await?;
        let map = build_symbol_map(pairs);
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
        let limit = limit.clamp(1, MAX_CANDLES);
        let mut query = vec![
            ("currency_pair", self.market_id(symbol).await),
            ("interval", interval(timeframe)?),
        ];
        // `limit` cannot be combined with `from`/`to`
        match since {
            Some(since) => {
                let from = since.div_euclid(1000);
                let to = from + timeframe.duration_secs() * (limit as i64 - 1);
                query.push(("from", from.to_string()));
                query.push(("to", to.to_string()));
            }
            None => query.push(("limit", limit.to_string())),
        }

        let rows: Vec<Vec<Value>> = self.rest.get_json("spot/candlesticks", &query).await?;
        let candles = rows.iter().map(|row| parse_candle(row)).collect::<Result<Vec<_>>>()?;
        Ok(window(candles, since, limit))
    }

    async fn fetch_tickers(&self, symbols: Option<&[String]>) -> Result<HashMap<String, Ticker>> {
        let items: Vec<TickerResponse> = self.rest.get_json("spot/tickers", &[]).await?;
        let map = self.symbols.read().await;

        Ok(collect_tickers(&map, items.iter().map(raw_ticker), symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candle_row_order() {
        let row: Vec<Value> = serde_json::from_str(
            r#"["1539852480", "971519.677", "0.0021724", "0.0021922", "0.0021724", "0.0021737", "447182.2", "true"]"#,
        )
        .unwrap();
        let candle = parse_candle(&row).unwrap();
        assert_eq!(candle.timestamp, 1_539_852_480_000);
        assert_eq!(candle.close, 0.0021724);
        assert_eq!(candle.high, 0.0021922);
        assert_eq!(candle.low, 0.0021724);
        assert_eq!(candle.open, 0.0021737);
        assert_eq!(candle.volume, 447182.2);
    }

    #[test]
    fn test_parse_candle_requires_base_volume() {
        let row: Vec<Value> =
            serde_json::from_str(r#"["1539852480", "1", "1", "1", "1", "1"]"#).unwrap();
        assert!(parse_candle(&row).is_err());
    }

    #[test]
    fn test_interval_names() {
        let name = |s: &str| interval(s.parse().unwrap());
        assert_eq!(name("5m").unwrap(), "5m");
        assert_eq!(name("4h").unwrap(), "4h");
        assert_eq!(name("1w").unwrap(), "7d");
        assert_eq!(name("7d").unwrap(), "7d");
        assert!(name("3m").is_err());
        assert!(name("2h").is_err());
    }

    #[test]
    fn test_symbol_map_and_tickers() {
        let pairs: Vec<CurrencyPair> = serde_json::from_str(
            r#"[
                {"id": "BTC_USDT", "base": "BTC", "quote": "USDT", "trade_status": "tradable"},
                {"id": "ETH_USDT", "base": "ETH", "quote": "USDT", "trade_status": "tradable"},
                {"id": "OLD_USDT", "base": "OLD", "quote": "USDT", "trade_status": "untradable"}
            ]"#,
        )
        .unwrap();
        let map = build_symbol_map(pairs);
        assert_eq!(map.len(), 2);
        assert_eq!(map.id_for("BTC/USDT", "_"), "BTC_USDT");

        let items: Vec<TickerResponse> = serde_json::from_str(
            r#"[
                {"currency_pair": "BTC_USDT", "last": "42000.1", "change_percentage": "-2.5", "quote_volume": "123456.7"},
                {"currency_pair": "ETH_USDT", "last": "2200", "change_percentage": "", "quote_volume": "1"},
                {"currency_pair": "OLD_USDT", "last": "1", "change_percentage": "1", "quote_volume": "1"}
            ]"#,
        )
        .unwrap();
        let wanted = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let tickers = collect_tickers(&map, items.iter().map(raw_ticker), Some(&wanted));
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers["BTC/USDT"].change_pct, -2.5);
        assert_eq!(tickers["BTC/USDT"].quote_volume, 123456.7);
    }

    #[test]
    fn test_rejects_futures() {
        assert!(GateioClient::new(MarketType::Futures).is_err());
    }
}
