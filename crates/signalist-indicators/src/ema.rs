//! Exponential moving average seeded with a simple moving average.
//!
//! The first defined value sits at index `period - 1` and equals the mean of the
//! first `period` inputs. After that `ema = x * k + ema * (1 - k)` with
//! `k = 2 / (period + 1)`.

pub fn smoothing_factor(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// EMA aligned with `values`; `None` during warmup or when `period == 0`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let k = smoothing_factor(period);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);

    for (i, &value) in values.iter().enumerate().skip(period) {
        current = value * k + current * (1.0 - k);
        out[i] = Some(current);
    }

    out
}
