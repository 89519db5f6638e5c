//! Volatility channels: Bollinger and Keltner bands.

use statrs::statistics::Statistics;

use crate::models::Candle;

use super::atr::atr;
use super::moving_average::{ema, sma};

pub const BAND_PERIOD: usize = 20;
pub const BAND_WIDTH: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct BandColumns {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bollinger bands: SMA middle, population standard deviation width.
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> BandColumns {
    let middle = sma(closes, period);
    let mut upper = vec![None; closes.len()];
    let mut lower = vec![None; closes.len()];

    for (i, mid) in middle.iter().enumerate() {
        let Some(mid) = mid else { continue };
        let std_dev = closes[i + 1 - period..=i].iter().population_std_dev();
        upper[i] = Some(mid + width * std_dev);
        lower[i] = Some(mid - width * std_dev);
    }

    BandColumns { upper, middle, lower }
}

/// Keltner channels: EMA middle, ATR width.
pub fn keltner(candles: &[Candle], period: usize, width: f64) -> BandColumns {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = ema(&closes, period);
    let range = atr(candles, period);

    let upper = middle
        .iter()
        .zip(&range)
        .map(|(m, r)| Some((*m)? + width * (*r)?))
        .collect();
    let lower = middle
        .iter()
        .zip(&range)
        .map(|(m, r)| Some((*m)? - width * (*r)?))
        .collect();

    BandColumns { upper, middle, lower }
}
