//! Pieces shared by the REST exchange adapters: a retrying JSON getter, the
//! unified-symbol map and ticker assembly.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::models::Candle;

use super::Ticker;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(20);

/// HTTP client bound to one API base URL.
pub(super) struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// GET with retries on network errors, 429 and 5xx. Other statuses fail
    /// immediately.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let client = &self.client;
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        debug!(url = %url, "Fetching market data");

        let body = retry(policy, || async {
            let response = client
                .get(&url)
                .query(query)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e)))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e)))?;

            if status.is_success() {
                Ok(text)
            } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(backoff::Error::transient(anyhow!("{} failed: {} - {}", path, status, text)))
            } else {
                Err(backoff::Error::permanent(anyhow!("{} failed: {} - {}", path, status, text)))
            }
        })
        .await?;

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", path))
    }
}

/// Unified symbol ("BTC/USDT") to exchange id ("BTCUSDT", "BTC-USDT", ...)
/// and back.
#[derive(Debug, Default)]
pub(super) struct SymbolMap {
    to_id: HashMap<String, String>,
    to_unified: HashMap<String, String>,
}

impl SymbolMap {
    pub fn insert(&mut self, base: &str, quote: &str, id: impl Into<String>) {
        let id = id.into();
        let unified = format!("{}/{}", base, quote);
        self.to_unified.insert(id.clone(), unified.clone());
        self.to_id.insert(unified, id);
    }

    pub fn len(&self) -> usize {
        self.to_id.len()
    }

    /// Exchange id for `symbol`; without metadata the `/` is replaced by
    /// the exchange's separator.
    pub fn id_for(&self, symbol: &str, separator: &str) -> String {
        self.to_id
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.replace('/', separator))
    }

    pub fn unified(&self, id: &str) -> Option<&String> {
        self.to_unified.get(id)
    }
}

/// A ticker as the exchange reports it, before symbol unification.
pub(super) struct RawTicker<'a> {
    pub id: &'a str,
    pub last: Option<&'a str>,
    pub change_pct: Option<f64>,
    pub quote_volume: Option<&'a str>,
}

/// Keep tickers for known markets (optionally only `symbols`) whose numbers
/// all parse, keyed by unified symbol.
pub(super) fn collect_tickers<'a>(
    map: &SymbolMap,
    raw: impl IntoIterator<Item = RawTicker<'a>>,
    symbols: Option<&[String]>,
) -> HashMap<String, Ticker> {
    let mut tickers = HashMap::new();
    for t in raw {
        let Some(unified) = map.unified(t.id) else {
            continue;
        };
        if let Some(wanted) = symbols {
            if !wanted.iter().any(|s| s == unified) {
                continue;
            }
        }
        let (Some(Ok(last)), Some(change_pct), Some(Ok(quote_volume))) = (
            t.last.map(str::parse::<f64>),
            t.change_pct,
            t.quote_volume.map(str::parse::<f64>),
        ) else {
            continue;
        };
        tickers.insert(
            unified.clone(),
            Ticker {
                symbol: unified.clone(),
                last,
                change_pct,
                quote_volume,
            },
        );
    }
    tickers
}

/// Exchanges send numbers as JSON strings or numbers.
pub(super) fn parse_number(value: &Value) -> Result<f64> {
    match value {
        Value::String(s) => s.parse().with_context(|| format!("bad number: {}", s)),
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("bad number: {}", n)),
        other => Err(anyhow!("unexpected candle field: {}", other)),
    }
}

/// Epoch seconds (string or number) as epoch milliseconds.
pub(super) fn parse_secs_as_ms(value: &Value) -> Result<i64> {
    let secs = match value {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    secs.map(|s| s * 1000)
        .ok_or_else(|| anyhow!("bad candle time: {}", value))
}

/// Candles ascending, starting at `since` when given, else the newest
/// `limit`.
pub(super) fn window(mut candles: Vec<Candle>, since: Option<i64>, limit: u32) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    let limit = limit as usize;
    match since {
        Some(since) => candles
            .into_iter()
            .filter(|c| c.timestamp >= since)
            .take(limit)
            .collect(),
        None => {
            let skip = candles.len().saturating_sub(limit);
            candles.into_iter().skip(skip).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(timestamp: i64) -> Candle {
        Candle {
            timestamp,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn test_symbol_map_fallback_uses_separator() {
        let mut map = SymbolMap::default();
        map.insert("BTC", "USDT", "BTC-USDT");
        assert_eq!(map.id_for("BTC/USDT", "_"), "BTC-USDT");
        assert_eq!(map.id_for("ETH/USDT", "_"), "ETH_USDT");
        assert_eq!(map.unified("BTC-USDT").map(String::as_str), Some("BTC/USDT"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_collect_tickers_filters_unknown_and_unparseable() {
        let mut map = SymbolMap::default();
        map.insert("BTC", "USDT", "BTCUSDT");
        map.insert("ETH", "USDT", "ETHUSDT");
        let raw = vec![
            RawTicker { id: "BTCUSDT", last: Some("42000.5"), change_pct: Some(1.5), quote_volume: Some("1000") },
            RawTicker { id: "ETHUSDT", last: None, change_pct: Some(0.5), quote_volume: Some("10") },
            RawTicker { id: "DOGEUSDT", last: Some("0.1"), change_pct: Some(9.0), quote_volume: Some("5") },
        ];
        let tickers = collect_tickers(&map, raw, None);
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers["BTC/USDT"].last, 42000.5);
    }

    #[test]
    fn test_window_orders_and_limits() {
        let rows = vec![candle(3), candle(1), candle(2), candle(2)];
        let newest = window(rows.clone(), None, 2);
        assert_eq!(newest.iter().map(|c| c.timestamp).collect::<Vec<_>>(), vec![2, 3]);

        let from = window(rows, Some(2), 1);
        assert_eq!(from.iter().map(|c| c.timestamp).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_parse_secs_as_ms() {
        assert_eq!(parse_secs_as_ms(&Value::from("1566789720")).unwrap(), 1_566_789_720_000);
        assert_eq!(parse_secs_as_ms(&Value::from(60)).unwrap(), 60_000);
        assert!(parse_secs_as_ms(&Value::from("soon")).is_err());
    }
}
