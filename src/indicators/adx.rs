//! Average Directional Index with +DI / -DI, Wilder smoothing.
//!
//! 1. +DM / -DM and true range from consecutive bars
//! 2. Wilder-smoothed sums of +DM, -DM and TR over `period` bars
//! 3. +DI = 100 * sm(+DM) / sm(TR), -DI likewise
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI)
//! 5. ADX = mean of the first `period` DX values, then Wilder-smoothed

use crate::models::Candle;

use super::atr::true_range;

#[derive(Debug, Clone)]
pub struct AdxColumns {
    pub adx: Vec<Option<f64>>,
    pub plus_di: Vec<Option<f64>>,
    pub minus_di: Vec<Option<f64>>,
}

pub fn adx(candles: &[Candle], period: usize) -> AdxColumns {
    let len = candles.len();
    let mut cols = AdxColumns {
        adx: vec![None; len],
        plus_di: vec![None; len],
        minus_di: vec![None; len],
    };
    if period == 0 || len <= period {
        return cols;
    }

    let tr = true_range(candles);
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let n = period as f64;
    let mut sm_tr: f64 = tr[1..=period].iter().sum();
    let mut sm_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut sm_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut dx_sum = 0.0;
    let mut dx_count = 0usize;
    let mut adx_value = 0.0;

    for i in period..len {
        if i > period {
            sm_tr = sm_tr - sm_tr / n + tr[i];
            sm_plus = sm_plus - sm_plus / n + plus_dm[i];
            sm_minus = sm_minus - sm_minus / n + minus_dm[i];
        }

        let (pdi, mdi) = if sm_tr > 0.0 {
            (100.0 * sm_plus / sm_tr, 100.0 * sm_minus / sm_tr)
        } else {
            (0.0, 0.0)
        };
        let di_sum = pdi + mdi;
        let dx = if di_sum > 0.0 {
            100.0 * (pdi - mdi).abs() / di_sum
        } else {
            0.0
        };

        cols.plus_di[i] = Some(pdi);
        cols.minus_di[i] = Some(mdi);

        if dx_count < period {
            dx_sum += dx;
            dx_count += 1;
            if dx_count == period {
                adx_value = dx_sum / n;
                cols.adx[i] = Some(adx_value);
            }
        } else {
            adx_value = (adx_value * (n - 1.0) + dx) / n;
            cols.adx[i] = Some(adx_value);
        }
    }

    cols
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending(len: usize, step: f64) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let base = 100.0 + i as f64 * step;
                Candle {
                    timestamp: i as i64,
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + 0.5,
                    volume: 1.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_warmup_lengths() {
        let cols = adx(&trending(40, 1.0), 14);
        assert!(cols.plus_di[13].is_none());
        assert!(cols.plus_di[14].is_some());
        assert!(cols.adx[26].is_none());
        assert!(cols.adx[27].is_some());
    }

    #[test]
    fn test_uptrend_has_dominant_plus_di() {
        let cols = adx(&trending(60, 1.5), 14);
        let last = 59;
        assert!(cols.plus_di[last].unwrap() > cols.minus_di[last].unwrap());
        let value = cols.adx[last].unwrap();
        assert!(value > 20.0 && value <= 100.0);
    }

    #[test]
    fn test_downtrend_has_dominant_minus_di() {
        let cols = adx(&trending(60, -1.5), 14);
        assert!(cols.minus_di[59].unwrap() > cols.plus_di[59].unwrap());
    }

    #[test]
    fn test_too_short() {
        let cols = adx(&trending(10, 1.0), 14);
        assert!(cols.adx.iter().all(Option::is_none));
    }
}
