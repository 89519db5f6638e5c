//! Simple and exponential moving averages.

/// Simple moving average; `None` until `period` values have been seen.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period`
/// values, then `alpha = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(value);
    for i in period..values.len() {
        value = alpha * values[i] + (1.0 - alpha) * value;
        out[i] = Some(value);
    }
    out
}

/// EMA over a partially defined series, starting at its first defined value.
///
/// Values after a gap are not expected; a `None` after the first defined value
/// ends the computation.
pub fn ema_of_defined(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };

    let tail: Vec<f64> = values[start..].iter().map_while(|v| *v).collect();
    for (offset, v) in ema(&tail, period).into_iter().enumerate() {
        out[start + offset] = v;
    }
    out
}
