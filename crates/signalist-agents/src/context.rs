use serde::Serialize;
use signalist_models::{
    Holding, IndicatorSet, MarketResearch, NarrativeFragment, Position, PriceSeries, Signal,
};

/// A team member that did not contribute, as reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberFailure {
    pub role: String,
    pub reason: String,
}

/// State threaded through one run for one ticker.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    pub ticker: String,
    pub price_series: Option<PriceSeries>,
    pub indicator_set: Option<IndicatorSet>,
    pub signal: Option<Signal>,
    pub research: Option<MarketResearch>,
    pub holdings: Vec<Holding>,
    pub narrative_fragments: Vec<NarrativeFragment>,
    pub failures: Vec<MemberFailure>,
}

impl PipelineContext {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into().trim().to_uppercase(),
            price_series: None,
            indicator_set: None,
            signal: None,
            research: None,
            holdings: Vec::new(),
            narrative_fragments: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Overwrite every field the update carries.
    pub fn apply(&mut self, update: ContextUpdate) {
        if let Some(series) = update.price_series {
            self.price_series = Some(series);
        }
        if let Some(set) = update.indicator_set {
            self.indicator_set = Some(set);
        }
        if let Some(signal) = update.signal {
            self.signal = Some(signal);
        }
        if let Some(research) = update.research {
            self.research = Some(research);
        }
        if let Some(holdings) = update.holdings {
            self.holdings = holdings;
        }
    }

    pub fn push_fragment(&mut self, role: impl Into<String>, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        self.narrative_fragments.push(NarrativeFragment {
            role: role.into(),
            text: text.trim().to_string(),
        });
    }

    /// Aggregate position for the run's ticker, if any lots are held.
    pub fn position(&self) -> Option<Position> {
        Position::from_holdings(&self.ticker, &self.holdings)
    }
}

/// Fields a role writes back. `None` leaves the context untouched.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub price_series: Option<PriceSeries>,
    pub indicator_set: Option<IndicatorSet>,
    pub signal: Option<Signal>,
    pub research: Option<MarketResearch>,
    pub holdings: Option<Vec<Holding>>,
}

impl ContextUpdate {
    pub fn is_empty(&self) -> bool {
        self.price_series.is_none()
            && self.indicator_set.is_none()
            && self.signal.is_none()
            && self.research.is_none()
            && self.holdings.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use signalist_models::Decision;

    #[test]
    fn apply_only_overwrites_present_fields() {
        let mut ctx = PipelineContext::new(" cof ");
        assert_eq!(ctx.ticker, "COF");

        ctx.apply(ContextUpdate {
            signal: Some(Signal {
                decision: Decision::Hold,
                rationale: "neutral".into(),
            }),
            ..ContextUpdate::default()
        });
        ctx.apply(ContextUpdate::default());
        assert_eq!(ctx.signal.as_ref().unwrap().decision, Decision::Hold);
        assert!(ctx.price_series.is_none());
    }

    #[test]
    fn blank_fragments_are_dropped() {
        let mut ctx = PipelineContext::new("COF");
        ctx.push_fragment("history", "   ");
        ctx.push_fragment("technical", " Cooling off. \n");
        assert_eq!(ctx.narrative_fragments.len(), 1);
        assert_eq!(ctx.narrative_fragments[0].text, "Cooling off.");
    }

    #[test]
    fn position_sums_matching_lots() {
        let mut ctx = PipelineContext::new("COF");
        let lot = |ticker: &str, q| Holding {
            ticker: ticker.into(),
            quantity: q,
            cost_basis: dec!(100),
            acquired_on: None,
            source_file: "a.csv".into(),
        };
        ctx.apply(ContextUpdate {
            holdings: Some(vec![lot("COF", dec!(2)), lot("AAPL", dec!(1)), lot("COF", dec!(3))]),
            ..ContextUpdate::default()
        });
        let position = ctx.position().unwrap();
        assert_eq!(position.lots, 2);
        assert_eq!(position.quantity, dec!(5));
        assert!(ContextUpdate::default().is_empty());
    }
}
