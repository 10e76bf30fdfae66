//! MACD (Moving Average Convergence Divergence).
//!
//! MACD line = EMA(fast) - EMA(slow)
//! Signal line = EMA(signal) of the MACD line, seeded once the line is defined
//! Histogram = MACD line - signal line

use crate::ema::ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD aligned with `closes`; `None` until both the line and its signal line
/// are defined, i.e. before index `max(fast, slow) + signal - 2`.
pub fn macd_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Vec<Option<MacdPoint>> {
    let mut out = vec![None; closes.len()];
    if fast == 0 || slow == 0 || signal_period == 0 {
        return out;
    }

    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line_start = fast.max(slow) - 1;
    if closes.len() <= line_start {
        return out;
    }

    let line: Vec<f64> = fast_ema[line_start..]
        .iter()
        .zip(&slow_ema[line_start..])
        .filter_map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = ema(&line, signal_period);

    for (j, (value, sig)) in line.iter().zip(signal).enumerate() {
        if let Some(sig) = sig {
            out[line_start + j] = Some(MacdPoint {
                line: *value,
                signal: sig,
                histogram: value - sig,
            });
        }
    }

    out
}

/// MACD at the last close, if defined.
pub fn latest_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdPoint> {
    macd_series(closes, fast, slow, signal_period)
        .last()
        .copied()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_defined_index_for_defaults() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).sin()).collect();
        let series = macd_series(&closes, 12, 26, 9);
        // line from index 25, signal seeded over 9 line values
        assert!(series[..33].iter().all(Option::is_none));
        assert!(series[33..].iter().all(Option::is_some));
    }

    #[test]
    fn constant_prices_have_flat_macd() {
        let point = latest_macd(&[50.0; 60], 12, 26, 9).unwrap();
        assert_relative_eq!(point.line, 0.0, epsilon = 1e-9);
        assert_relative_eq!(point.signal, 0.0, epsilon = 1e-9);
        assert_relative_eq!(point.histogram, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn rising_prices_have_positive_line() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let point = latest_macd(&closes, 12, 26, 9).unwrap();
        assert!(point.line > 0.0);
        assert_relative_eq!(point.histogram, point.line - point.signal, epsilon = 1e-12);
    }

    #[test]
    fn linear_trend_line_matches_lag_difference() {
        // for a linear series the EMA lag is (period - 1) / 2 bars,
        // so the line converges to slope * (slow - fast) / 2
        let closes: Vec<f64> = (0..400).map(|i| 10.0 + 0.5 * i as f64).collect();
        let point = latest_macd(&closes, 12, 26, 9).unwrap();
        assert_relative_eq!(point.line, 0.5 * 7.0, epsilon = 1e-6);
        assert_relative_eq!(point.signal, 0.5 * 7.0, epsilon = 1e-6);
    }

    #[test]
    fn short_or_zero_periods_are_undefined() {
        assert!(latest_macd(&[1.0; 20], 12, 26, 9).is_none());
        assert!(latest_macd(&[1.0; 60], 0, 26, 9).is_none());
    }
}
