//! True range and Average True Range (Wilder smoothing).

use crate::models::Candle;

/// True range per bar. The first bar has no previous close, so it uses
/// its own high-low span.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let span = c.high - c.low;
            if i == 0 {
                span
            } else {
                let prev_close = candles[i - 1].close;
                span.max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            }
        })
        .collect()
}

/// ATR: mean of the first `period` true ranges, then
/// `atr = (prev * (period - 1) + tr) / period`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }

    let tr = true_range(candles);
    let n = period as f64;
    let mut value = tr[..period].iter().sum::<f64>() / n;
    out[period - 1] = Some(value);
    for i in period..tr.len() {
        value = (value * (n - 1.0) + tr[i]) / n;
        out[i] = Some(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_true_range_uses_gap_from_previous_close() {
        let candles = vec![bar(10.0, 9.0, 9.5), bar(12.0, 11.0, 11.5)];
        let tr = true_range(&candles);
        assert_eq!(tr[0], 1.0);
        // gap up: high - prev_close = 12 - 9.5
        assert_eq!(tr[1], 2.5);
    }

    #[test]
    fn test_atr_constant_range() {
        let candles: Vec<Candle> = (0..20).map(|_| bar(11.0, 9.0, 10.0)).collect();
        let out = atr(&candles, 14);
        assert!(out[..13].iter().all(Option::is_none));
        assert_eq!(out[13], Some(2.0));
        assert_eq!(out[19], Some(2.0));
    }
}
