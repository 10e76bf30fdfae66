use signalist_models::{Decision, IndicatorSet, Signal};

use crate::error::IndicatorError;

pub const OVERSOLD: f64 = 30.0;
pub const OVERBOUGHT: f64 = 70.0;

/// Classify an indicator snapshot.
///
/// Buy is tested before Sell; their RSI ranges are disjoint so the order only
/// matters as a documented tie-break. Everything else is Hold.
pub fn classify(ind: &IndicatorSet) -> Result<Signal, IndicatorError> {
    if !ind.sufficient_data {
        return Err(IndicatorError::InsufficientData);
    }

    let rsi = ind.rsi14;
    let (line, signal) = (ind.macd_line, ind.macd_signal);

    if rsi < OVERSOLD && line > signal {
        return Ok(Signal {
            decision: Decision::Buy,
            rationale: format!(
                "RSI {rsi:.1} is oversold (below {OVERSOLD:.0}) and the MACD line \
                 ({line:.3}) is above its signal line ({signal:.3}), a bullish crossover."
            ),
        });
    }

    if rsi > OVERBOUGHT && line < signal {
        return Ok(Signal {
            decision: Decision::Sell,
            rationale: format!(
                "RSI {rsi:.1} is overbought (above {OVERBOUGHT:.0}) and the MACD line \
                 ({line:.3}) is below its signal line ({signal:.3}), a bearish crossover."
            ),
        });
    }

    let relation = if line > signal {
        "above"
    } else if line < signal {
        "below"
    } else {
        "level with"
    };
    Ok(Signal {
        decision: Decision::Hold,
        rationale: format!(
            "No buy or sell condition is met: RSI {rsi:.1} with the MACD line \
             {relation} its signal line."
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn oversold_with_bullish_crossover_is_buy() {
        let signal = classify(&IndicatorSet::new(25.0, 0.8, 0.5)).unwrap();
        assert_eq!(signal.decision, Decision::Buy);
        assert!(signal.rationale.contains("oversold"));
        assert!(signal.rationale.contains("bullish crossover"));
    }

    #[test]
    fn overbought_with_bearish_crossover_is_sell() {
        let signal = classify(&IndicatorSet::new(75.0, -0.2, 0.1)).unwrap();
        assert_eq!(signal.decision, Decision::Sell);
        assert!(signal.rationale.contains("overbought"));
        assert!(signal.rationale.contains("bearish crossover"));
    }

    #[test]
    fn oversold_without_crossover_is_hold() {
        let signal = classify(&IndicatorSet::new(25.0, -0.5, 0.5)).unwrap();
        assert_eq!(signal.decision, Decision::Hold);
        assert!(!signal.rationale.contains("oversold"));
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(classify(&IndicatorSet::new(30.0, 1.0, 0.0)).unwrap().decision, Decision::Hold);
        assert_eq!(classify(&IndicatorSet::new(70.0, 0.0, 1.0)).unwrap().decision, Decision::Hold);
    }

    #[test]
    fn equal_lines_are_hold() {
        let signal = classify(&IndicatorSet::new(10.0, 0.4, 0.4)).unwrap();
        assert_eq!(signal.decision, Decision::Hold);
        assert!(signal.rationale.contains("level with"));
    }

    #[test]
    fn insufficient_data_is_an_error_not_hold() {
        assert_eq!(
            classify(&IndicatorSet::insufficient()),
            Err(IndicatorError::InsufficientData)
        );
    }

    proptest! {
        #[test]
        fn classification_is_total_and_deterministic(
            rsi in 0.0f64..=100.0,
            line in -50.0f64..50.0,
            signal in -50.0f64..50.0,
        ) {
            let set = IndicatorSet::new(rsi, line, signal);
            let first = classify(&set).unwrap();
            let second = classify(&set).unwrap();
            prop_assert_eq!(&first, &second);

            let expected = if rsi < 30.0 && line > signal {
                Decision::Buy
            } else if rsi > 70.0 && line < signal {
                Decision::Sell
            } else {
                Decision::Hold
            };
            prop_assert_eq!(first.decision, expected);
        }
    }
}
