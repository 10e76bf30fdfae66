use signalist_models::{IndicatorParams, IndicatorSet, PriceSeries};
use tracing::debug;

use crate::macd::latest_macd;
use crate::rsi::latest_rsi;

/// Computes the latest-bar RSI/MACD snapshot for a price series.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorEngine {
    params: IndicatorParams,
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Never fails: short or unusable input yields `sufficient_data = false`.
    pub fn compute(&self, series: &PriceSeries) -> IndicatorSet {
        compute(series, &self.params)
    }
}

pub fn compute(series: &PriceSeries, params: &IndicatorParams) -> IndicatorSet {
    let p = params;
    if p.rsi_period == 0 || p.macd_fast == 0 || p.macd_slow == 0 || p.macd_signal == 0 {
        debug!(ticker = series.ticker(), ?params, "Zero indicator period");
        return IndicatorSet::insufficient();
    }

    if series.len() < p.min_bars() {
        debug!(
            ticker = series.ticker(),
            bars = series.len(),
            required = p.min_bars(),
            "Not enough bars for indicators"
        );
        return IndicatorSet::insufficient();
    }

    let closes = series.closes();
    if closes.iter().any(|c| !c.is_finite()) {
        debug!(ticker = series.ticker(), "Non-finite close in series");
        return IndicatorSet::insufficient();
    }

    match (
        latest_rsi(&closes, p.rsi_period),
        latest_macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal),
    ) {
        (Some(rsi), Some(macd)) => IndicatorSet {
            rsi14: rsi,
            macd_line: macd.line,
            macd_signal: macd.signal,
            macd_histogram: macd.histogram,
            sufficient_data: true,
        },
        _ => IndicatorSet::insufficient(),
    }
}
