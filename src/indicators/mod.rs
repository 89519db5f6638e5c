//! Indicator engine: annotates an ordered OHLCV series with indicator columns.
//!
//! Every column has one entry per candle. Leading rows that lack enough
//! history are `None`; callers must check validity before trusting a value.

mod adx;
mod atr;
mod bands;
mod macd;
mod moving_average;
mod rsi;
mod vwap;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Candle;

use adx::adx;
use atr::atr;
use bands::{bollinger, keltner};
use macd::macd;
use moving_average::{ema, sma};
use rsi::rsi;
use vwap::{has_volume, vwap};

const DEFAULT_EMA_PERIODS: [u32; 4] = [10, 20, 50, 200];

/// Indicator identity as written in rule configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorName {
    Open,
    High,
    Low,
    Close,
    Volume,
    Ema,
    Sma,
    Rsi,
    Macd,
    MacdSignal,
    MacdHist,
    Adx,
    PlusDi,
    MinusDi,
    Atr,
    BbUpper,
    BbMiddle,
    BbLower,
    KcUpper,
    KcMiddle,
    KcLower,
    Vwap,
    /// Any name the engine does not compute. Rules using it fail closed.
    #[serde(other)]
    Unknown,
}

impl IndicatorName {
    /// Period used when a rule omits one; `None` for period-less columns.
    pub fn default_period(&self) -> Option<u32> {
        match self {
            IndicatorName::Ema | IndicatorName::Sma => Some(20),
            IndicatorName::Rsi
            | IndicatorName::Adx
            | IndicatorName::PlusDi
            | IndicatorName::MinusDi
            | IndicatorName::Atr => Some(14),
            IndicatorName::BbUpper
            | IndicatorName::BbMiddle
            | IndicatorName::BbLower
            | IndicatorName::KcUpper
            | IndicatorName::KcMiddle
            | IndicatorName::KcLower => Some(bands::BAND_PERIOD as u32),
            _ => None,
        }
    }

    /// Whether a rule may pick an arbitrary period for this indicator.
    pub fn has_variable_period(&self) -> bool {
        matches!(
            self,
            IndicatorName::Ema
                | IndicatorName::Sma
                | IndicatorName::Rsi
                | IndicatorName::Atr
                | IndicatorName::Adx
                | IndicatorName::PlusDi
                | IndicatorName::MinusDi
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorName::Open => "open",
            IndicatorName::High => "high",
            IndicatorName::Low => "low",
            IndicatorName::Close => "close",
            IndicatorName::Volume => "volume",
            IndicatorName::Ema => "ema",
            IndicatorName::Sma => "sma",
            IndicatorName::Rsi => "rsi",
            IndicatorName::Macd => "macd",
            IndicatorName::MacdSignal => "macd_signal",
            IndicatorName::MacdHist => "macd_hist",
            IndicatorName::Adx => "adx",
            IndicatorName::PlusDi => "plus_di",
            IndicatorName::MinusDi => "minus_di",
            IndicatorName::Atr => "atr",
            IndicatorName::BbUpper => "bb_upper",
            IndicatorName::BbMiddle => "bb_middle",
            IndicatorName::BbLower => "bb_lower",
            IndicatorName::KcUpper => "kc_upper",
            IndicatorName::KcMiddle => "kc_middle",
            IndicatorName::KcLower => "kc_lower",
            IndicatorName::Vwap => "vwap",
            IndicatorName::Unknown => "unknown",
        }
    }
}

/// A column reference: indicator name plus optional period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndicatorRef {
    #[serde(rename = "indicator")]
    pub name: IndicatorName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
}

impl IndicatorRef {
    pub fn new(name: IndicatorName, period: Option<u32>) -> Self {
        Self { name, period }
    }

    pub fn plain(name: IndicatorName) -> Self {
        Self { name, period: None }
    }

    /// The key under which the column is stored: default period filled in,
    /// period dropped for period-less columns.
    pub fn normalized(&self) -> Self {
        match self.name.default_period() {
            Some(default) => Self {
                name: self.name,
                period: Some(self.period.unwrap_or(default)),
            },
            None => Self::plain(self.name),
        }
    }
}

impl fmt::Display for IndicatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Some(p) => write!(f, "{}_{}", self.name.as_str(), p),
            None => f.write_str(self.name.as_str()),
        }
    }
}

/// A candle series with its indicator columns.
#[derive(Debug, Clone, Default)]
pub struct IndicatorFrame {
    candles: Vec<Candle>,
    columns: HashMap<IndicatorRef, Vec<Option<f64>>>,
}

impl IndicatorFrame {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Whether a column exists for the reference (after normalization).
    #[cfg(test)]
    pub fn has_column(&self, indicator: &IndicatorRef) -> bool {
        self.columns.contains_key(&indicator.normalized())
    }

    /// Column values, `None` when the column was never computed.
    pub fn column(&self, indicator: &IndicatorRef) -> Option<&[Option<f64>]> {
        self.columns
            .get(&indicator.normalized())
            .map(Vec::as_slice)
    }

    /// Value at `row`; `None` if the column is missing or undefined there.
    pub fn value(&self, indicator: &IndicatorRef, row: usize) -> Option<f64> {
        self.column(indicator)?.get(row).copied().flatten()
    }

    /// Defined values on the last row, keyed by column name.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        let Some(last) = self.candles.len().checked_sub(1) else {
            return BTreeMap::new();
        };
        self.columns
            .iter()
            .filter_map(|(key, values)| values[last].map(|v| (key.to_string(), v)))
            .collect()
    }

    fn insert(&mut self, key: IndicatorRef, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.candles.len());
        self.columns.insert(key.normalized(), values);
    }
}

fn price_column(candles: &[Candle], field: impl Fn(&Candle) -> f64) -> Vec<Option<f64>> {
    candles.iter().map(|c| Some(field(c))).collect()
}

/// Annotate with the default indicator set.
#[cfg(test)]
pub fn annotate(candles: Vec<Candle>) -> IndicatorFrame {
    annotate_with(candles, &[])
}

/// Annotate with the default set plus any extra periods referenced in `extra`.
pub fn annotate_with(candles: Vec<Candle>, extra: &[IndicatorRef]) -> IndicatorFrame {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut frame = IndicatorFrame {
        candles,
        columns: HashMap::new(),
    };

    let open = price_column(&frame.candles, |c| c.open);
    let high = price_column(&frame.candles, |c| c.high);
    let low = price_column(&frame.candles, |c| c.low);
    let close = price_column(&frame.candles, |c| c.close);
    let volume = price_column(&frame.candles, |c| c.volume);
    frame.insert(IndicatorRef::plain(IndicatorName::Open), open);
    frame.insert(IndicatorRef::plain(IndicatorName::High), high);
    frame.insert(IndicatorRef::plain(IndicatorName::Low), low);
    frame.insert(IndicatorRef::plain(IndicatorName::Close), close);
    frame.insert(IndicatorRef::plain(IndicatorName::Volume), volume);

    let mut ema_periods: Vec<u32> = DEFAULT_EMA_PERIODS.to_vec();
    let mut sma_periods = vec![20];
    let mut rsi_periods = vec![14];
    let mut atr_periods = vec![14];
    let mut adx_periods = vec![14];
    for r in extra.iter().map(IndicatorRef::normalized) {
        if !r.name.has_variable_period() {
            continue;
        }
        let Some(period) = r.period else { continue };
        let bucket = match r.name {
            IndicatorName::Ema => &mut ema_periods,
            IndicatorName::Sma => &mut sma_periods,
            IndicatorName::Rsi => &mut rsi_periods,
            IndicatorName::Atr => &mut atr_periods,
            _ => &mut adx_periods,
        };
        if period > 0 && !bucket.contains(&period) {
            bucket.push(period);
        }
    }

    for p in ema_periods {
        frame.insert(
            IndicatorRef::new(IndicatorName::Ema, Some(p)),
            ema(&closes, p as usize),
        );
    }
    for p in sma_periods {
        frame.insert(
            IndicatorRef::new(IndicatorName::Sma, Some(p)),
            sma(&closes, p as usize),
        );
    }
    for p in rsi_periods {
        frame.insert(
            IndicatorRef::new(IndicatorName::Rsi, Some(p)),
            rsi(&closes, p as usize),
        );
    }
    for p in atr_periods {
        let values = atr(&frame.candles, p as usize);
        frame.insert(IndicatorRef::new(IndicatorName::Atr, Some(p)), values);
    }
    for p in adx_periods {
        let cols = adx(&frame.candles, p as usize);
        frame.insert(IndicatorRef::new(IndicatorName::Adx, Some(p)), cols.adx);
        frame.insert(IndicatorRef::new(IndicatorName::PlusDi, Some(p)), cols.plus_di);
        frame.insert(IndicatorRef::new(IndicatorName::MinusDi, Some(p)), cols.minus_di);
    }

    let m = macd(&closes, macd::FAST, macd::SLOW, macd::SIGNAL);
    frame.insert(IndicatorRef::plain(IndicatorName::Macd), m.line);
    frame.insert(IndicatorRef::plain(IndicatorName::MacdSignal), m.signal);
    frame.insert(IndicatorRef::plain(IndicatorName::MacdHist), m.histogram);

    let bb = bollinger(&closes, bands::BAND_PERIOD, bands::BAND_WIDTH);
    frame.insert(IndicatorRef::plain(IndicatorName::BbUpper), bb.upper);
    frame.insert(IndicatorRef::plain(IndicatorName::BbMiddle), bb.middle);
    frame.insert(IndicatorRef::plain(IndicatorName::BbLower), bb.lower);

    let kc = keltner(&frame.candles, bands::BAND_PERIOD, bands::BAND_WIDTH);
    frame.insert(IndicatorRef::plain(IndicatorName::KcUpper), kc.upper);
    frame.insert(IndicatorRef::plain(IndicatorName::KcMiddle), kc.middle);
    frame.insert(IndicatorRef::plain(IndicatorName::KcLower), kc.lower);

    if has_volume(&frame.candles) {
        let values = vwap(&frame.candles);
        frame.insert(IndicatorRef::plain(IndicatorName::Vwap), values);
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle {
                    timestamp: i as i64 * 3_600_000,
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_default_columns_present() {
        let frame = annotate(series(60));
        for p in [10, 20, 50, 200] {
            assert!(frame.has_column(&IndicatorRef::new(IndicatorName::Ema, Some(p))));
        }
        assert!(frame.has_column(&IndicatorRef::plain(IndicatorName::Rsi)));
        assert!(frame.has_column(&IndicatorRef::plain(IndicatorName::Vwap)));
        assert!(!frame.has_column(&IndicatorRef::new(IndicatorName::Ema, Some(33))));
    }

    #[test]
    fn test_default_period_normalization() {
        let frame = annotate(series(30));
        let implicit = IndicatorRef::plain(IndicatorName::Rsi);
        let explicit = IndicatorRef::new(IndicatorName::Rsi, Some(14));
        assert_eq!(frame.value(&implicit, 29), frame.value(&explicit, 29));
        assert!(frame.value(&implicit, 29).is_some());

        // Period is ignored for period-less columns.
        let close = IndicatorRef::new(IndicatorName::Close, Some(5));
        assert_eq!(frame.value(&close, 0), Some(100.0));
    }

    #[test]
    fn test_insufficient_history_leaves_undefined_rows() {
        let frame = annotate(series(60));
        let ema200 = IndicatorRef::new(IndicatorName::Ema, Some(200));
        assert!(frame.column(&ema200).unwrap().iter().all(Option::is_none));
        assert_eq!(frame.value(&ema200, 59), None);
    }

    #[test]
    fn test_extra_periods_computed_on_demand() {
        let extra = [IndicatorRef::new(IndicatorName::Ema, Some(33))];
        let frame = annotate_with(series(40), &extra);
        assert!(frame.value(&extra[0], 39).is_some());
    }

    #[test]
    fn test_snapshot_holds_defined_last_row_values() {
        let frame = annotate(series(30));
        let snap = frame.snapshot();
        assert_eq!(snap.get("close"), Some(&129.0));
        assert!(snap.contains_key("ema_10"));
        assert!(!snap.contains_key("ema_200"));
        assert!(annotate(Vec::new()).snapshot().is_empty());
    }

    #[test]
    fn test_unknown_indicator_deserializes() {
        let r: IndicatorRef = serde_json::from_str(r#"{"indicator":"supertrend","period":7}"#).unwrap();
        assert_eq!(r.name, IndicatorName::Unknown);
    }
}
