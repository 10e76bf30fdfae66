//! Yahoo Finance provider.
//!
//! Uses the v8 chart API for prices, v10 quoteSummary for company profile and
//! analyst trends, and v1 search for headlines. Yahoo has no official API, so
//! every response shape is parsed defensively.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use signalist_models::{
    AnalystRecommendation, CompanyInfo, NewsItem, PriceBar, PriceSeries, Quote,
};
use reqwest::Url;
use tracing::debug;

use crate::error::MarketDataError;
use crate::provider::MarketDataProvider;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    quote_summary: SummaryResult,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    result: Option<Vec<SummaryData>>,
    error: Option<YahooError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryData {
    asset_profile: Option<AssetProfile>,
    price: Option<PriceModule>,
    recommendation_trend: Option<RecommendationTrend>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetProfile {
    sector: Option<String>,
    industry: Option<String>,
    long_business_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    long_name: Option<String>,
    short_name: Option<String>,
    market_cap: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RecommendationTrend {
    trend: Vec<TrendEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrendEntry {
    period: String,
    #[serde(default)]
    strong_buy: u32,
    #[serde(default)]
    buy: u32,
    #[serde(default)]
    hold: u32,
    #[serde(default)]
    sell: u32,
    #[serde(default)]
    strong_sell: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<SearchNews>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNews {
    title: String,
    publisher: Option<String>,
    link: Option<String>,
    provider_publish_time: Option<i64>,
}

/// Yahoo Finance market data provider.
pub struct YahooProvider {
    client: reqwest::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new() -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MarketDataError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `base_url` joined with `segments`, each percent-encoded as one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, MarketDataError> {
        let invalid = |reason: String| {
            MarketDataError::Network(format!("invalid base URL {}: {reason}", self.base_url))
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn chart_url(&self, symbol: &str, lookback_days: u32) -> Result<Url, MarketDataError> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(i64::from(lookback_days));
        let mut url = self.endpoint(&["v8", "finance", "chart", symbol])?;
        url.query_pairs_mut()
            .append_pair("period1", &start.timestamp().to_string())
            .append_pair("period2", &end.timestamp().to_string())
            .append_pair("interval", "1d");
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        symbol: &str,
        url: Url,
    ) -> Result<T, MarketDataError> {
        debug!(symbol, url = %url, "Yahoo request");
        let resp = self.client.get(url).send().await.map_err(|e| {
            MarketDataError::Network(format!("{symbol}: {e}"))
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(MarketDataError::RateLimited { retry_after_secs });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(MarketDataError::Auth(format!(
                "Yahoo Finance returned {status} for {symbol}"
            )));
        }
        if !status.is_success() {
            return Err(MarketDataError::Network(format!("HTTP {status} for {symbol}")));
        }

        resp.json::<T>().await.map_err(|e| {
            MarketDataError::ResponseFormat(format!("failed to parse response for {symbol}: {e}"))
        })
    }

    async fn summary(&self, symbol: &str, modules: &str) -> Result<SummaryData, MarketDataError> {
        let mut url = self.endpoint(&["v10", "finance", "quoteSummary", symbol])?;
        url.query_pairs_mut().append_pair("modules", modules);
        let resp: SummaryResponse = self.get_json(symbol, url).await?;
        parse_summary(symbol, resp)
    }
}

fn yahoo_error(symbol: &str, err: Option<YahooError>) -> MarketDataError {
    match err {
        Some(err) if err.code == "Not Found" => MarketDataError::NotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => MarketDataError::ResponseFormat(format!("{}: {}", err.code, err.description)),
        None => MarketDataError::ResponseFormat("empty result with no error".into()),
    }
}

fn first_chart(symbol: &str, resp: ChartResponse) -> Result<ChartData, MarketDataError> {
    let ChartResult { result, error } = resp.chart;
    result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| yahoo_error(symbol, error))
}

/// Convert a chart response into a sorted, de-duplicated series.
/// Rows without a close (holidays, halted sessions) are skipped.
fn parse_chart(symbol: &str, resp: ChartResponse) -> Result<PriceSeries, MarketDataError> {
    let data = first_chart(symbol, resp)?;
    let timestamps = data
        .timestamp
        .ok_or_else(|| MarketDataError::ResponseFormat("no timestamps".into()))?;
    let quote = data
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .ok_or_else(|| MarketDataError::ResponseFormat("no quote data".into()))?;

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };
        let date = DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| MarketDataError::ResponseFormat(format!("invalid timestamp: {ts}")))?;

        bars.push(PriceBar {
            date,
            open: quote.open.get(i).copied().flatten().unwrap_or(close),
            high: quote.high.get(i).copied().flatten().unwrap_or(close),
            low: quote.low.get(i).copied().flatten().unwrap_or(close),
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
        });
    }

    if bars.is_empty() {
        return Err(MarketDataError::NotFound {
            symbol: symbol.to_string(),
        });
    }

    Ok(PriceSeries::from_unsorted(symbol, bars))
}

fn parse_quote(symbol: &str, resp: ChartResponse) -> Result<Quote, MarketDataError> {
    let meta = first_chart(symbol, resp)?
        .meta
        .ok_or_else(|| MarketDataError::ResponseFormat("no chart meta".into()))?;
    let price = meta
        .regular_market_price
        .ok_or_else(|| MarketDataError::ResponseFormat("no regularMarketPrice".into()))?;
    let as_of = meta
        .regular_market_time
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Ok(Quote {
        ticker: symbol.to_string(),
        price,
        currency: meta.currency,
        as_of,
    })
}

fn parse_summary(symbol: &str, resp: SummaryResponse) -> Result<SummaryData, MarketDataError> {
    let SummaryResult { result, error } = resp.quote_summary;
    result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| yahoo_error(symbol, error))
}

fn company_from_summary(symbol: &str, data: SummaryData) -> CompanyInfo {
    let (name, market_cap) = match data.price {
        Some(price) => (
            price.long_name.or(price.short_name),
            price.market_cap.and_then(|m| m.raw),
        ),
        None => (None, None),
    };
    let (sector, industry, summary) = match data.asset_profile {
        Some(profile) => (profile.sector, profile.industry, profile.long_business_summary),
        None => (None, None, None),
    };

    CompanyInfo {
        ticker: symbol.to_string(),
        name,
        sector,
        industry,
        summary,
        market_cap,
    }
}

fn recommendations_from_summary(data: SummaryData) -> Vec<AnalystRecommendation> {
    data.recommendation_trend
        .map(|t| t.trend)
        .unwrap_or_default()
        .into_iter()
        .map(|t| AnalystRecommendation {
            period: t.period,
            strong_buy: t.strong_buy,
            buy: t.buy,
            hold: t.hold,
            sell: t.sell,
            strong_sell: t.strong_sell,
        })
        .collect()
}

fn news_from_search(resp: SearchResponse) -> Vec<NewsItem> {
    resp.news
        .into_iter()
        .map(|n| NewsItem {
            title: n.title,
            publisher: n.publisher,
            link: n.link,
            published_at: n
                .provider_publish_time
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    async fn fetch_current_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        let mut url = self.endpoint(&["v8", "finance", "chart", ticker])?;
        url.query_pairs_mut()
            .append_pair("range", "1d")
            .append_pair("interval", "1d");
        let resp: ChartResponse = self.get_json(ticker, url).await?;
        parse_quote(ticker, resp)
    }

    async fn fetch_historical(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> Result<PriceSeries, MarketDataError> {
        let url = self.chart_url(ticker, lookback_days)?;
        let resp: ChartResponse = self.get_json(ticker, url).await?;
        let series = parse_chart(ticker, resp)?;
        debug!(ticker, bars = series.len(), "Fetched daily history");
        Ok(series)
    }

    async fn fetch_company_info(&self, ticker: &str) -> Result<CompanyInfo, MarketDataError> {
        let data = self.summary(ticker, "assetProfile,price").await?;
        Ok(company_from_summary(ticker, data))
    }

    async fn fetch_analyst_recommendations(
        &self,
        ticker: &str,
    ) -> Result<Vec<AnalystRecommendation>, MarketDataError> {
        let data = self.summary(ticker, "recommendationTrend").await?;
        Ok(recommendations_from_summary(data))
    }

    async fn fetch_company_news(&self, ticker: &str) -> Result<Vec<NewsItem>, MarketDataError> {
        let mut url = self.endpoint(&["v1", "finance", "search"])?;
        url.query_pairs_mut()
            .append_pair("q", ticker)
            .append_pair("newsCount", "10")
            .append_pair("quotesCount", "0");
        let resp: SearchResponse = self.get_json(ticker, url).await?;
        Ok(news_from_search(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart(json: serde_json::Value) -> ChartResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn parses_chart_and_skips_missing_closes() {
        let resp = chart(serde_json::json!({
            "chart": {
                "result": [{
                    "meta": {"currency": "USD", "regularMarketPrice": 12.5, "regularMarketTime": 1_759_939_200},
                    "timestamp": [1_759_766_400, 1_759_852_800, 1_759_939_200],
                    "indicators": {"quote": [{
                        "open": [10.0, null, 12.0],
                        "high": [10.5, null, 12.8],
                        "low": [9.5, null, 11.9],
                        "close": [10.2, null, 12.5],
                        "volume": [1000, null, 3000]
                    }]}
                }],
                "error": null
            }
        }));

        let series = parse_chart("AAPL", resp).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![10.2, 12.5]);
        assert_eq!(series.bars()[1].volume, 3000);
    }

    #[test]
    fn chart_not_found_error_maps_to_not_found() {
        let resp = chart(serde_json::json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}
        }));
        assert_eq!(
            parse_chart("ZZZZ", resp).unwrap_err(),
            MarketDataError::NotFound { symbol: "ZZZZ".to_string() }
        );
    }

    #[test]
    fn chart_with_no_usable_rows_is_not_found() {
        let resp = chart(serde_json::json!({
            "chart": {"result": [{
                "timestamp": [1_759_766_400],
                "indicators": {"quote": [{"open": [null], "high": [null], "low": [null], "close": [null], "volume": [null]}]}
            }], "error": null}
        }));
        assert!(matches!(parse_chart("AAPL", resp), Err(MarketDataError::NotFound { .. })));
    }

    #[test]
    fn parses_quote_from_meta() {
        let resp = chart(serde_json::json!({
            "chart": {"result": [{
                "meta": {"currency": "USD", "regularMarketPrice": 231.4, "regularMarketTime": 1_759_939_200},
                "timestamp": [],
                "indicators": {"quote": []}
            }], "error": null}
        }));
        let quote = parse_quote("AAPL", resp).unwrap();
        assert_eq!(quote.price, 231.4);
        assert_eq!(quote.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn parses_company_and_recommendations() {
        let resp: SummaryResponse = serde_json::from_value(serde_json::json!({
            "quoteSummary": {"result": [{
                "assetProfile": {"sector": "Financial Services", "industry": "Credit Services", "longBusinessSummary": "Capital One..."},
                "price": {"longName": "Capital One Financial Corporation", "marketCap": {"raw": 85_000_000_000.0}},
                "recommendationTrend": {"trend": [
                    {"period": "0m", "strongBuy": 5, "buy": 12, "hold": 6, "sell": 1, "strongSell": 0},
                    {"period": "-1m", "buy": 10}
                ]}
            }], "error": null}
        }))
        .unwrap();

        let data = parse_summary("COF", resp).unwrap();
        let recs = recommendations_from_summary(SummaryData {
            recommendation_trend: data.recommendation_trend,
            ..SummaryData::default()
        });
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].strong_buy, 5);
        assert_eq!(recs[1].buy, 10);
        assert_eq!(recs[1].hold, 0);

        let info = company_from_summary(
            "COF",
            SummaryData {
                asset_profile: data.asset_profile,
                price: data.price,
                recommendation_trend: None,
            },
        );
        assert_eq!(info.name.as_deref(), Some("Capital One Financial Corporation"));
        assert_eq!(info.sector.as_deref(), Some("Financial Services"));
        assert_eq!(info.market_cap, Some(85_000_000_000.0));
    }

    #[test]
    fn parses_news() {
        let resp: SearchResponse = serde_json::from_value(serde_json::json!({
            "news": [{"title": "Capital One closes Discover deal", "publisher": "Reuters", "link": "https://example.com/a", "providerPublishTime": 1_759_939_200}]
        }))
        .unwrap();
        let news = news_from_search(resp);
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].publisher.as_deref(), Some("Reuters"));
        assert!(news[0].published_at.is_some());
    }

    #[test]
    fn base_url_override_is_trimmed() {
        let provider = YahooProvider::new().unwrap().with_base_url("http://localhost:9000/");
        assert!(provider
            .chart_url("AAPL", 100)
            .unwrap()
            .as_str()
            .starts_with("http://localhost:9000/v8/finance/chart/AAPL?period1="));
    }

    #[test]
    fn symbols_are_encoded_as_one_segment() {
        let provider = YahooProvider::new().unwrap().with_base_url("http://localhost:9000");
        let url = provider.chart_url("BRK/B?x=1", 30).unwrap();
        assert_eq!(url.path(), "/v8/finance/chart/BRK%2FB%3Fx=1");
        assert_eq!(url.query_pairs().count(), 3);

        let url = provider.endpoint(&["v1", "finance", "search"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/v1/finance/search");
    }

    #[test]
    fn unusable_base_url_is_reported() {
        let provider = YahooProvider::new().unwrap().with_base_url("not a url");
        assert!(matches!(provider.chart_url("AAPL", 30), Err(MarketDataError::Network(_))));
    }
}
