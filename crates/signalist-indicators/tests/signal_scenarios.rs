//! End-to-end engine + classifier scenarios over synthetic 100-bar histories.

use chrono::NaiveDate;
use signalist_indicators::{classify, IndicatorEngine, IndicatorError};
use signalist_models::{Decision, PriceBar, PriceSeries};

fn series_from(closes: impl IntoIterator<Item = f64>) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let bars = closes
        .into_iter()
        .enumerate()
        .map(|(i, close)| PriceBar {
            date: start + chrono::Duration::days(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 250_000,
        })
        .collect();
    PriceSeries::new("SCEN", bars).unwrap()
}

/// A decline that is losing steam: every close is lower but by less each day.
fn decelerating_decline() -> PriceSeries {
    series_from((0..100).map(|t| 50.0 + 50.0 * 0.95f64.powi(t)))
}

/// A rally that is cooling off: every close is higher but by less each day.
fn decelerating_rally() -> PriceSeries {
    series_from((0..100).map(|t| 100.0 - 50.0 * 0.95f64.powi(t)))
}

/// Steps of `-step * decay^t`, except every `every`-th day moves by `bounce`.
fn sawtooth(start: f64, every: i32, step: f64, decay: f64, bounce: f64) -> PriceSeries {
    let mut close = start;
    let mut closes = vec![close];
    for t in 1..100 {
        close += if t % every == 0 { bounce } else { -step * decay.powi(t) };
        closes.push(close);
    }
    series_from(closes)
}

#[test]
fn choppy_decline_near_25_is_buy() {
    // falls two days, bounces on the third; the falls shrink over time
    let set = IndicatorEngine::default().compute(&sawtooth(100.0, 3, 2.0, 0.97, 0.1));
    assert!(set.sufficient_data);
    approx::assert_abs_diff_eq!(set.rsi14, 25.2, epsilon = 0.05);
    assert!(set.macd_line > set.macd_signal + 0.05);

    let signal = classify(&set).unwrap();
    assert_eq!(signal.decision, Decision::Buy);
    assert!(signal.rationale.contains("RSI 25.2 is oversold"), "{}", signal.rationale);
    assert!(signal.rationale.contains("bullish crossover"));
}

#[test]
fn choppy_rally_near_75_is_sell() {
    // rises one day, dips on the next; the rises shrink over time
    let set = IndicatorEngine::default().compute(&sawtooth(50.0, 2, -2.0, 0.99, -0.3));
    assert!(set.sufficient_data);
    approx::assert_abs_diff_eq!(set.rsi14, 75.25, epsilon = 0.05);
    assert!(set.macd_line < set.macd_signal - 0.05);

    let signal = classify(&set).unwrap();
    assert_eq!(signal.decision, Decision::Sell);
    assert!(signal.rationale.contains("RSI 75.3 is overbought"), "{}", signal.rationale);
    assert!(signal.rationale.contains("bearish crossover"));
}

#[test]
fn decelerating_decline_is_buy() {
    let set = IndicatorEngine::default().compute(&decelerating_decline());
    assert!(set.sufficient_data);
    assert!(set.rsi14 < 30.0, "rsi {}", set.rsi14);
    assert!(set.macd_line > set.macd_signal);

    let signal = classify(&set).unwrap();
    assert_eq!(signal.decision, Decision::Buy);
    assert!(signal.rationale.contains("oversold"));
    assert!(signal.rationale.contains("bullish crossover"));
}

#[test]
fn decelerating_rally_is_sell() {
    let set = IndicatorEngine::default().compute(&decelerating_rally());
    assert!(set.sufficient_data);
    assert!(set.rsi14 > 70.0, "rsi {}", set.rsi14);
    assert!(set.macd_line < set.macd_signal);
    assert_eq!(classify(&set).unwrap().decision, Decision::Sell);
}

#[test]
fn flat_history_is_hold() {
    let set = IndicatorEngine::default().compute(&series_from(vec![42.0; 100]));
    assert_eq!(set.rsi14, 50.0);
    assert_eq!(classify(&set).unwrap().decision, Decision::Hold);
}

#[test]
fn same_series_gives_same_signal() {
    let engine = IndicatorEngine::default();
    let series = decelerating_decline();
    let first = classify(&engine.compute(&series)).unwrap();
    let second = classify(&engine.compute(&series)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn short_history_never_silently_holds() {
    for len in [0usize, 10, 20, 34] {
        let set = IndicatorEngine::default().compute(&series_from((0..len).map(|i| 10.0 + i as f64)));
        assert!(!set.sufficient_data);
        assert_eq!(classify(&set), Err(IndicatorError::InsufficientData));
    }
}
