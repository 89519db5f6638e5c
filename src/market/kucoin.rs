//! KuCoin public REST market data, spot only.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::{Candle, MarketType, TimeUnit, Timeframe};

use super::rest::{collect_tickers, parse_number, parse_secs_as_ms, window, RawTicker, RestClient, SymbolMap};
use super::{MarketDataClient, Ticker};

const API_BASE: &str = "https://api.kucoin.com";
const SUCCESS_CODE: &str = "200000";
const MAX_CANDLES: u32 = 1500;

/// Every response is wrapped as `{"code": "200000", "data": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T> {
        if self.code != SUCCESS_CODE {
            bail!(
                "kucoin error {}: {}",
                self.code,
                self.msg.unwrap_or_default()
            );
        }
        self.data.ok_or_else(|| anyhow!("kucoin response without data"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_currency: String,
    quote_currency: String,
    enable_trading: bool,
}

#[derive(Debug, Deserialize)]
struct AllTickers {
    ticker: Vec<TickerResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    symbol: String,
    last: Option<String>,
    /// Fraction, 0.0123 for +1.23%
    change_rate: Option<String>,
    vol_value: Option<String>,
}

pub struct KucoinClient {
    rest: RestClient,
    symbols: RwLock<SymbolMap>,
}

impl KucoinClient {
    pub fn new(market_type: MarketType) -> Result<Self> {
        if market_type != MarketType::Spot {
            bail!("kucoin supports spot market data only");
        }
        Ok(Self {
            rest: RestClient::new(API_BASE)?,
            symbols: RwLock::new(SymbolMap::default()),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let envelope: Envelope<T> = self.rest.get_json(path, query).await?;
        envelope.into_data()
    }

    async fn market_id(&self, symbol: &str) -> String {
        self.symbols.read().await.id_for(symbol, "-")
    }
}

fn interval(timeframe: Timeframe) -> Result<String> {
    let n = timeframe.count();
    match (timeframe.unit(), n) {
        (TimeUnit::Minute, 1 | 3 | 5 | 15 | 30) => Ok(format!("{}min", n)),
        (TimeUnit::Hour, 1 | 2 | 4 | 6 | 8 | 12) => Ok(format!("{}hour", n)),
        (TimeUnit::Day, 1) => Ok("1day".to_string()),
        (TimeUnit::Week, 1) => Ok("1week".to_string()),
        _ => bail!("kucoin has no {} candles", timeframe),
    }
}

/// `[time, open, close, high, low, volume, turnover]`, time in seconds.
fn parse_candle(row: &[Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(anyhow!("candle row has {} fields", row.len()));
    }
    Ok(Candle {
        timestamp: parse_secs_as_ms(&row[0])?,
        open: parse_number(&row[1])?,
        close: parse_number(&row[2])?,
        high: parse_number(&row[3])?,
        low: parse_number(&row[4])?,
        volume: parse_number(&row[5])?,
    })
}

fn raw_ticker(t: &TickerResponse) -> RawTicker<'_> {
    RawTicker {
        id: &t.symbol,
        last: t.last.as_deref(),
        change_pct: t
            .change_rate
            .as_deref()
            .and_then(|r| r.parse::<f64>().ok())
            .map(|r| r * 100.0),
        quote_volume: t.vol_value.as_deref(),
    }
}

fn build_symbol_map(symbols: Vec<SymbolInfo>) -> SymbolMap {
    let mut map = SymbolMap::default();
    for s in symbols.into_iter().filter(|s| s.enable_trading) {
        map.insert(&s.base_currency, &s.quote_currency, s.symbol);
    }
    map
}

#[async_trait]
impl MarketDataClient for KucoinClient {
    fn exchange(&self) -> &str {
        "kucoin"
    }

    fn market_type(&self) -> MarketType {
        MarketType::Spot
    }

    async fn load_markets(&self) -> Result<usize> {
        let symbols: Vec<SymbolInfo> = self.get("api/v2/symbols", &[]).await?;
        let map = build_symbol_map(symbols);
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
        let span = timeframe.duration_secs() * limit as i64;
        let start = match since {
            Some(since) => since.div_euclid(1000),
            None => Utc::now().timestamp() - span,
        };
        let query = [
            ("symbol", self.market_id(symbol).await),
            ("type", interval(timeframe)?),
            ("startAt", start.to_string()),
            ("endAt", (start + span).to_string()),
        ];

        // Newest first
        let rows: Vec<Vec<Value>> = self.get("api/v1/market/candles", &query).await?;
        let candles = rows.iter().map(|row| parse_candle(row)).collect::<Result<Vec<_>>>()?;
        Ok(window(candles, since, limit))
    }

    async fn fetch_tickers(&self, symbols: Option<&[String]>) -> Result<HashMap<String, Ticker>> {
        let all: AllTickers = self.get("api/v1/market/allTickers", &[]).await?;
        let map = self.symbols.read().await;

        Ok(collect_tickers(&map, all.ticker.iter().map(raw_ticker), symbols))
    }
}
