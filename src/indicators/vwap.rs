//! Volume-weighted average price, anchored to the UTC day.

use crate::models::Candle;

const DAY_MS: i64 = 86_400_000;

/// Cumulative typical-price VWAP that resets at each UTC midnight.
/// Undefined while the day's cumulative volume is zero.
pub fn vwap(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(candles.len());
    let mut day = None;
    let mut pv = 0.0;
    let mut vol = 0.0;

    for c in candles {
        let bucket = c.timestamp.div_euclid(DAY_MS);
        if day != Some(bucket) {
            day = Some(bucket);
            pv = 0.0;
            vol = 0.0;
        }
        pv += c.typical_price() * c.volume;
        vol += c.volume;
        out.push(if vol > 0.0 { Some(pv / vol) } else { None });
    }
    out
}

/// Whether the series carries any traded volume at all.
pub fn has_volume(candles: &[Candle]) -> bool {
    candles.iter().any(|c| c.volume > 0.0)
}
