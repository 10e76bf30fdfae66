//! Market data provider trait.
//!
//! Providers only fetch; they never retry. Retrying and failure classification
//! belong to the orchestrator.

use async_trait::async_trait;
use signalist_models::{AnalystRecommendation, CompanyInfo, NewsItem, PriceSeries, Quote};

use crate::error::MarketDataError;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    async fn fetch_current_price(&self, ticker: &str) -> Result<Quote, MarketDataError>;

    /// Daily bars covering the last `lookback_days` calendar days.
    async fn fetch_historical(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> Result<PriceSeries, MarketDataError>;

    async fn fetch_company_info(&self, ticker: &str) -> Result<CompanyInfo, MarketDataError>;

    async fn fetch_analyst_recommendations(
        &self,
        ticker: &str,
    ) -> Result<Vec<AnalystRecommendation>, MarketDataError>;

    async fn fetch_company_news(&self, ticker: &str) -> Result<Vec<NewsItem>, MarketDataError>;
}
