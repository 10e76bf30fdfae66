//! Named tool capabilities that roles invoke with JSON arguments.
//!
//! Roles may only call tools listed in their bindings; bindings are checked
//! against the registry when a plan is built.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use signalist_market::{HoldingsError, HoldingsLoader, MarketDataError, MarketDataProvider};
use thiserror::Error;
use tracing::debug;

pub const PRICE_HISTORY: &str = "price_history";
pub const CURRENT_PRICE: &str = "current_price";
pub const COMPANY_INFO: &str = "company_info";
pub const ANALYST_RECOMMENDATIONS: &str = "analyst_recommendations";
pub const COMPANY_NEWS: &str = "company_news";
pub const READ_HOLDINGS: &str = "read_holdings";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("tool {0} is not bound to this role")]
    NotBound(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool's worker stopped before producing a result.
    #[error("tool {tool} did not finish: {reason}")]
    Interrupted { tool: String, reason: String },

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    Holdings(#[from] HoldingsError),

    #[error("tool output could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn input_schema(&self) -> Value;

    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// Registry of tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Name to schema for every tool, for prompts and diagnostics.
    pub fn schemas(&self) -> BTreeMap<String, Value> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.input_schema()))
            .collect()
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        debug!(tool = name, %args, "Invoking tool");
        tool.invoke(args).await
    }
}

/// Registry with every market-data tool backed by `provider`.
pub fn market_tools(provider: Arc<dyn MarketDataProvider>, lookback_days: u32) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in MarketCall::ALL {
        registry.register(Arc::new(MarketTool {
            kind,
            provider: Arc::clone(&provider),
            lookback_days,
        }));
    }
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarketCall {
    PriceHistory,
    CurrentPrice,
    CompanyInfo,
    AnalystRecommendations,
    CompanyNews,
}

impl MarketCall {
    const ALL: [MarketCall; 5] = [
        MarketCall::PriceHistory,
        MarketCall::CurrentPrice,
        MarketCall::CompanyInfo,
        MarketCall::AnalystRecommendations,
        MarketCall::CompanyNews,
    ];

    fn name(self) -> &'static str {
        match self {
            MarketCall::PriceHistory => PRICE_HISTORY,
            MarketCall::CurrentPrice => CURRENT_PRICE,
            MarketCall::CompanyInfo => COMPANY_INFO,
            MarketCall::AnalystRecommendations => ANALYST_RECOMMENDATIONS,
            MarketCall::CompanyNews => COMPANY_NEWS,
        }
    }

    fn description(self) -> &'static str {
        match self {
            MarketCall::PriceHistory => "Daily OHLCV bars for a ticker over a lookback window",
            MarketCall::CurrentPrice => "Latest traded price for a ticker",
            MarketCall::CompanyInfo => "Company profile: name, sector, industry, summary",
            MarketCall::AnalystRecommendations => "Analyst buy/hold/sell counts by period",
            MarketCall::CompanyNews => "Recent news headlines for a ticker",
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketArgs {
    ticker: String,
    #[serde(default)]
    lookback_days: Option<u32>,
}

/// One market-data call exposed as a tool.
pub struct MarketTool {
    kind: MarketCall,
    provider: Arc<dyn MarketDataProvider>,
    lookback_days: u32,
}

#[async_trait]
impl Tool for MarketTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn input_schema(&self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": {"ticker": {"type": "string"}},
            "required": ["ticker"],
        });
        if self.kind == MarketCall::PriceHistory {
            schema["properties"]["lookback_days"] = json!({"type": "integer", "minimum": 1});
        }
        schema
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let args: MarketArgs = parse_args(self.name(), args)?;
        let ticker = args.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                reason: "ticker must not be empty".to_string(),
            });
        }

        let provider = &self.provider;
        let value = match self.kind {
            MarketCall::PriceHistory => {
                let days = args.lookback_days.unwrap_or(self.lookback_days);
                serde_json::to_value(provider.fetch_historical(&ticker, days).await?)?
            }
            MarketCall::CurrentPrice => {
                serde_json::to_value(provider.fetch_current_price(&ticker).await?)?
            }
            MarketCall::CompanyInfo => {
                serde_json::to_value(provider.fetch_company_info(&ticker).await?)?
            }
            MarketCall::AnalystRecommendations => {
                serde_json::to_value(provider.fetch_analyst_recommendations(&ticker).await?)?
            }
            MarketCall::CompanyNews => {
                serde_json::to_value(provider.fetch_company_news(&ticker).await?)?
            }
        };
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
struct HoldingsArgs {
    #[serde(default)]
    ticker: Option<String>,
}

/// Reads brokerage holdings from the configured CSV directory.
pub struct HoldingsTool {
    loader: HoldingsLoader,
}

impl HoldingsTool {
    pub fn new(loader: HoldingsLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Tool for HoldingsTool {
    fn name(&self) -> &str {
        READ_HOLDINGS
    }

    fn description(&self) -> &str {
        "Every holding lot from the portfolio CSV files, optionally filtered by ticker"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"ticker": {"type": "string"}},
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let args: HoldingsArgs = parse_args(READ_HOLDINGS, args)?;
        let loader = self.loader.clone();
        let holdings = tokio::task::spawn_blocking(move || match args.ticker {
            Some(ticker) => loader.load_for(&ticker),
            None => loader.load(),
        })
        .await
        .map_err(|e| interrupted(READ_HOLDINGS, e))??;
        Ok(serde_json::to_value(holdings)?)
    }
}

fn interrupted(tool: &str, err: tokio::task::JoinError) -> ToolError {
    ToolError::Interrupted {
        tool: tool.to_string(),
        reason: err.to_string(),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}
