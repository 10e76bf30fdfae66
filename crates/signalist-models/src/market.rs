use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// One daily OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Daily bars for one ticker, ascending by date with no duplicates.
/// Deserializing goes through [`PriceSeries::new`], so the ordering holds for
/// series that arrive as tool output too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawSeries")]
pub struct PriceSeries {
    ticker: String,
    bars: Vec<PriceBar>,
}

#[derive(Deserialize)]
struct RawSeries {
    ticker: String,
    bars: Vec<PriceBar>,
}

impl TryFrom<RawSeries> for PriceSeries {
    type Error = ModelError;

    fn try_from(raw: RawSeries) -> Result<Self, Self::Error> {
        PriceSeries::new(raw.ticker, raw.bars)
    }
}

impl PriceSeries {
    /// Build a series, rejecting bars whose dates are not strictly increasing.
    pub fn new(ticker: impl Into<String>, bars: Vec<PriceBar>) -> Result<Self, ModelError> {
        let ticker = ticker.into();
        if let Some(pair) = bars.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(ModelError::UnorderedSeries {
                ticker,
                previous: pair[0].date,
                next: pair[1].date,
            });
        }
        Ok(Self { ticker, bars })
    }

    /// Build a series from bars in any order. Bars are sorted and, for duplicate
    /// dates, the last one supplied wins.
    pub fn from_unsorted(ticker: impl Into<String>, mut bars: Vec<PriceBar>) -> Self {
        // stable sort keeps supply order within a date so dedup can keep the last
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        Self {
            ticker: ticker.into(),
            bars: deduped,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn latest(&self) -> Option<&PriceBar> {
        self.bars.last()
    }
}

/// Latest traded price for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub currency: Option<String>,
    pub as_of: DateTime<Utc>,
}

/// Company profile metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompanyInfo {
    pub ticker: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub summary: Option<String>,
    pub market_cap: Option<f64>,
}

/// Analyst recommendation counts for one period (e.g. "0m", "-1m").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalystRecommendation {
    pub period: String,
    pub strong_buy: u32,
    pub buy: u32,
    pub hold: u32,
    pub sell: u32,
    pub strong_sell: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub publisher: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Read-only research gathered by a data-retrieval role beyond price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MarketResearch {
    pub quote: Option<Quote>,
    pub company: Option<CompanyInfo>,
    pub recommendations: Vec<AnalystRecommendation>,
    pub news: Vec<NewsItem>,
}

impl MarketResearch {
    pub fn is_empty(&self) -> bool {
        self.quote.is_none()
            && self.company.is_none()
            && self.recommendations.is_empty()
            && self.news.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn new_accepts_increasing_dates() {
        let series = PriceSeries::new("AAPL", vec![bar(1, 10.0), bar(2, 11.0), bar(5, 12.0)]).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.ticker(), "AAPL");
        assert_eq!(series.closes(), vec![10.0, 11.0, 12.0]);
        assert_eq!(series.latest().unwrap().close, 12.0);
    }

    #[test]
    fn new_rejects_duplicate_dates() {
        let err = PriceSeries::new("AAPL", vec![bar(1, 10.0), bar(1, 11.0)]).unwrap_err();
        assert!(matches!(err, ModelError::UnorderedSeries { .. }));
    }

    #[test]
    fn new_rejects_descending_dates() {
        assert!(PriceSeries::new("AAPL", vec![bar(3, 10.0), bar(2, 11.0)]).is_err());
    }

    #[test]
    fn from_unsorted_sorts_and_keeps_last_duplicate() {
        let series =
            PriceSeries::from_unsorted("MSFT", vec![bar(4, 1.0), bar(2, 2.0), bar(4, 3.0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![2.0, 3.0]);
    }

    #[test]
    fn deserialize_checks_date_order() {
        let series = PriceSeries::new("AAPL", vec![bar(1, 10.0), bar(2, 11.0)]).unwrap();
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(serde_json::from_value::<PriceSeries>(json.clone()).unwrap(), series);

        let mut swapped = json;
        swapped["bars"].as_array_mut().unwrap().reverse();
        let err = serde_json::from_value::<PriceSeries>(swapped).unwrap_err();
        assert!(err.to_string().contains("AAPL"), "{err}");
    }

    #[test]
    fn research_is_empty_by_default() {
        assert!(MarketResearch::default().is_empty());
    }
}
