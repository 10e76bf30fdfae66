use std::fmt;

use serde::{Deserialize, Serialize};

/// Periods used by the indicator engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl IndicatorParams {
    /// Fewest bars for which every output is defined.
    pub fn min_bars(&self) -> usize {
        (self.macd_slow + self.macd_signal).max(self.rsi_period + 1)
    }
}

/// Latest-bar snapshot of RSI and MACD.
///
/// When `sufficient_data` is false every numeric field is NaN and must not be read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSet {
    pub rsi14: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub sufficient_data: bool,
}

impl IndicatorSet {
    pub fn insufficient() -> Self {
        Self {
            rsi14: f64::NAN,
            macd_line: f64::NAN,
            macd_signal: f64::NAN,
            macd_histogram: f64::NAN,
            sufficient_data: false,
        }
    }

    pub fn new(rsi14: f64, macd_line: f64, macd_signal: f64) -> Self {
        Self {
            rsi14,
            macd_line,
            macd_signal,
            macd_histogram: macd_line - macd_signal,
            sufficient_data: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Buy,
    Hold,
    Sell,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Buy => "Buy",
            Decision::Hold => "Hold",
            Decision::Sell => "Sell",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified recommendation with the conditions that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signal {
    pub decision: Decision,
    pub rationale: String,
}
