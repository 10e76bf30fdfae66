//! In-memory provider for tests and offline runs.

use std::collections::HashMap;

use async_trait::async_trait;
use signalist_models::{
    AnalystRecommendation, CompanyInfo, MarketResearch, NewsItem, PriceSeries, Quote,
};

use crate::error::MarketDataError;
use crate::provider::MarketDataProvider;

#[derive(Debug, Clone, Default)]
struct Entry {
    series: Option<PriceSeries>,
    research: MarketResearch,
}

/// Serves canned data keyed by upper-cased ticker. Unknown tickers are `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    entries: HashMap<String, Entry>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, ticker: &str) -> &mut Entry {
        self.entries.entry(ticker.to_uppercase()).or_default()
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        let ticker = series.ticker().to_string();
        self.entry(&ticker).series = Some(series);
        self
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        let ticker = quote.ticker.clone();
        self.entry(&ticker).research.quote = Some(quote);
        self
    }

    pub fn with_company(mut self, info: CompanyInfo) -> Self {
        let ticker = info.ticker.clone();
        self.entry(&ticker).research.company = Some(info);
        self
    }

    pub fn with_recommendations(
        mut self,
        ticker: &str,
        recommendations: Vec<AnalystRecommendation>,
    ) -> Self {
        self.entry(ticker).research.recommendations = recommendations;
        self
    }

    pub fn with_news(mut self, ticker: &str, news: Vec<NewsItem>) -> Self {
        self.entry(ticker).research.news = news;
        self
    }

    fn lookup(&self, ticker: &str) -> Result<&Entry, MarketDataError> {
        self.entries
            .get(&ticker.to_uppercase())
            .ok_or_else(|| MarketDataError::NotFound {
                symbol: ticker.to_string(),
            })
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_current_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        let entry = self.lookup(ticker)?;
        if let Some(quote) = &entry.research.quote {
            return Ok(quote.clone());
        }
        // fall back to the last close
        let bar = entry
            .series
            .as_ref()
            .and_then(|s| s.latest())
            .ok_or_else(|| MarketDataError::NotFound {
                symbol: ticker.to_string(),
            })?;
        Ok(Quote {
            ticker: ticker.to_uppercase(),
            price: bar.close,
            currency: None,
            as_of: bar
                .date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    async fn fetch_historical(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> Result<PriceSeries, MarketDataError> {
        let series = self
            .lookup(ticker)?
            .series
            .as_ref()
            .ok_or_else(|| MarketDataError::NotFound {
                symbol: ticker.to_string(),
            })?;

        let Some(last) = series.latest() else {
            return Ok(series.clone());
        };
        let cutoff = last.date - chrono::Duration::days(i64::from(lookback_days));
        let bars = series
            .bars()
            .iter()
            .filter(|b| b.date > cutoff)
            .cloned()
            .collect();
        Ok(PriceSeries::from_unsorted(series.ticker(), bars))
    }

    async fn fetch_company_info(&self, ticker: &str) -> Result<CompanyInfo, MarketDataError> {
        self.lookup(ticker)?
            .research
            .company
            .clone()
            .ok_or_else(|| MarketDataError::NotFound {
                symbol: ticker.to_string(),
            })
    }

    async fn fetch_analyst_recommendations(
        &self,
        ticker: &str,
    ) -> Result<Vec<AnalystRecommendation>, MarketDataError> {
        Ok(self.lookup(ticker)?.research.recommendations.clone())
    }

    async fn fetch_company_news(&self, ticker: &str) -> Result<Vec<NewsItem>, MarketDataError> {
        Ok(self.lookup(ticker)?.research.news.clone())
    }
}
