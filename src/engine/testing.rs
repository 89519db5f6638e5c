//! In-test collaborators: a scripted market-data client and a recording sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::api::{Decision, DispatchOutcome, SignalSink};
use crate::market::{ClientFactory, MarketDataClient, Ticker};
use crate::models::{Candle, MarketType, Timeframe, TradeSignal};

/// Serves whatever candles were scripted for (symbol, timeframe).
#[derive(Default)]
pub struct MockMarket {
    candles: Mutex<HashMap<(String, Timeframe), Vec<Candle>>>,
    pub fail: AtomicBool,
}

impl MockMarket {
    pub fn set(&self, symbol: &str, timeframe: &str, candles: Vec<Candle>) {
        let tf: Timeframe = timeframe.parse().unwrap();
        self.candles
            .lock()
            .unwrap()
            .insert((symbol.to_string(), tf), candles);
    }
}

#[async_trait]
impl MarketDataClient for MockMarket {
    fn exchange(&self) -> &str {
        "mock"
    }

    fn market_type(&self) -> MarketType {
        MarketType::Spot
    }

    async fn load_markets(&self) -> Result<usize> {
        Ok(self.candles.lock().unwrap().len())
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("exchange unavailable");
        }
        let all = self
            .candles
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        let limit = limit as usize;
        let rows = match since {
            Some(since) => all
                .into_iter()
                .filter(|c| c.timestamp >= since)
                .take(limit)
                .collect(),
            None => {
                let skip = all.len().saturating_sub(limit);
                all.into_iter().skip(skip).collect()
            }
        };
        Ok(rows)
    }

    async fn fetch_tickers(&self, _symbols: Option<&[String]>) -> Result<HashMap<String, Ticker>> {
        Ok(HashMap::new())
    }
}

/// Hands out one shared [`MockMarket`] and counts how often it was asked.
pub struct MockFactory {
    pub market: Arc<MockMarket>,
    pub creates: AtomicUsize,
    /// Panic on the next `create`, then behave
    pub panic_once: AtomicBool,
}

impl MockFactory {
    pub fn new(market: Arc<MockMarket>) -> Self {
        Self {
            market,
            creates: AtomicUsize::new(0),
            panic_once: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn create(&self, exchange: &str, _market_type: MarketType) -> Result<Arc<dyn MarketDataClient>> {
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("client factory crashed");
        }
        if exchange == "unsupported" {
            bail!("unsupported exchange: {}", exchange);
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.market.clone())
    }
}

/// Records every dispatched signal and answers with a fixed decision.
pub struct RecordingSink {
    pub signals: Mutex<Vec<TradeSignal>>,
    decision: Decision,
}

impl RecordingSink {
    pub fn approving() -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
            decision: Decision::Approve,
        }
    }

    pub fn taken(&self) -> Vec<TradeSignal> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn dispatch(&self, signal: &TradeSignal) -> Result<DispatchOutcome> {
        self.signals.lock().unwrap().push(signal.clone());
        Ok(DispatchOutcome {
            decision: self.decision,
            confidence: 1.0,
            reasoning: "recorded".to_string(),
            execution: None,
        })
    }
}

/// Candles of one timeframe starting at `start_ms`, one per close.
pub fn series(start_ms: i64, timeframe: &str, closes: &[f64]) -> Vec<Candle> {
    let tf: Timeframe = timeframe.parse().unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| Candle {
            timestamp: start_ms + i as i64 * tf.duration_ms(),
            open: *close,
            high: *close,
            low: *close,
            close: *close,
            volume: 1.0,
        })
        .collect()
}
