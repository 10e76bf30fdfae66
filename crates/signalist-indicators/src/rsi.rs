//! Relative Strength Index with Wilder's smoothing.
//!
//! The first average gain/loss is the mean of the first `period` bar-to-bar
//! deltas; later averages are `(prev * (period - 1) + current) / period`.
//! The first defined value sits at index `period`.

/// RSI from smoothed averages. Flat windows read 50, loss-free windows 100,
/// gain-free windows 0.
pub fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    match (avg_gain == 0.0, avg_loss == 0.0) {
        (true, true) => 50.0,
        (_, true) => 100.0,
        (true, _) => 0.0,
        _ => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    }
}

/// RSI aligned with `closes`; `None` during warmup or when `period == 0`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let n = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / n;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / n;
    out[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for delta_idx in period..gains.len() {
        avg_gain = (avg_gain * (n - 1.0) + gains[delta_idx]) / n;
        avg_loss = (avg_loss * (n - 1.0) + losses[delta_idx]) / n;
        // delta i spans closes i..=i+1
        out[delta_idx + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    out
}

/// RSI at the last close, if defined.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied().flatten()
}
