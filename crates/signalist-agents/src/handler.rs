//! Role handlers, one per capability.
//!
//! The orchestrator looks handlers up by the role's capability. A handler reads
//! the context, calls its bound tools and backend through [`RoleEnv`], and
//! returns the fields it wants written back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use signalist_indicators::{classify, IndicatorEngine};
use signalist_models::{
    AgentRole, AnalystRecommendation, Capability, CompanyInfo, Holding, IndicatorParams,
    MarketResearch, NewsItem, Position, PriceSeries, Quote, Signal,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendRegistry, GenerationRequest};
use crate::context::{ContextUpdate, PipelineContext};
use crate::error::{AgentError, BackendFailure};
use crate::prompts;
use crate::stream::{ChunkForwarder, StreamChunk};
use crate::tools::{
    ToolError, ToolRegistry, ANALYST_RECOMMENDATIONS, COMPANY_INFO, COMPANY_NEWS, CURRENT_PRICE,
    PRICE_HISTORY, READ_HOLDINGS,
};

/// What a role hands back to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RoleOutput {
    pub update: ContextUpdate,
    /// Text appended to the run's narrative.
    pub fragment: Option<String>,
    /// The fragment already reached the output chunk by chunk.
    pub streamed: bool,
}

impl RoleOutput {
    pub fn new(update: ContextUpdate) -> Self {
        Self {
            update,
            ..Self::default()
        }
    }

    pub fn with_fragment(mut self, text: impl Into<String>) -> Self {
        self.fragment = Some(text.into());
        self.streamed = false;
        self
    }

    /// A fragment produced by [`RoleEnv::generate`].
    pub fn with_streamed_fragment(mut self, text: impl Into<String>) -> Self {
        self.fragment = Some(text.into());
        self.streamed = true;
        self
    }
}

#[async_trait]
pub trait RoleHandler: Send + Sync {
    async fn run(&self, ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError>;
}

pub type HandlerRegistry = HashMap<Capability, Arc<dyn RoleHandler>>;

/// Handlers for every capability with daily-analysis narration.
pub fn default_handlers(params: IndicatorParams) -> HandlerRegistry {
    let mut handlers: HandlerRegistry = HashMap::new();
    handlers.insert(Capability::DataRetrieval, Arc::new(DataRetrievalHandler));
    handlers.insert(
        Capability::IndicatorAnalysis,
        Arc::new(IndicatorAnalysisHandler::new(params)),
    );
    handlers.insert(
        Capability::PortfolioAggregation,
        Arc::new(PortfolioAggregationHandler),
    );
    handlers.insert(
        Capability::NarrativeSynthesis,
        Arc::new(NarrativeSynthesisHandler::new(NarrativeStyle::Daily)),
    );
    handlers
}

/// Everything a handler may touch while running one role.
#[derive(Clone)]
pub struct RoleEnv {
    role: AgentRole,
    tools: Arc<ToolRegistry>,
    backends: Arc<BackendRegistry>,
    forwarder: Arc<ChunkForwarder>,
    cancel: CancellationToken,
}

impl RoleEnv {
    pub fn new(
        role: AgentRole,
        tools: Arc<ToolRegistry>,
        backends: Arc<BackendRegistry>,
        forwarder: Arc<ChunkForwarder>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            role,
            tools,
            backends,
            forwarder,
            cancel,
        }
    }

    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_model_backed(&self) -> bool {
        self.role.backend.model_name().is_some()
    }

    /// Invoke a tool this role is bound to.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        let tool_error = |source| AgentError::Tool {
            role: self.role.name.clone(),
            source,
        };
        if !self.role.binds(name) {
            return Err(tool_error(ToolError::NotBound(name.to_string())));
        }
        self.tools.invoke(name, args).await.map_err(tool_error)
    }

    async fn call_typed<T: DeserializeOwned>(&self, name: &str, ticker: &str) -> Result<T, AgentError> {
        let value = self.call_tool(name, json!({ "ticker": ticker })).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call a research tool if bound. Fatal failures are logged and skipped;
    /// retryable ones propagate so the role is retried.
    async fn optional<T: DeserializeOwned>(
        &self,
        name: &str,
        ticker: &str,
    ) -> Result<Option<T>, AgentError> {
        if !self.role.binds(name) {
            return Ok(None);
        }
        match self.call_typed(name, ticker).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!(role = %self.role.name, tool = name, error = %e, "Research tool failed, skipping");
                Ok(None)
            }
        }
    }

    /// Stream a generation from the role's backend. Every chunk is forwarded
    /// to the output as it arrives; the full transcript is returned.
    pub async fn generate(
        &self,
        system_prompt: String,
        user_prompt: String,
    ) -> Result<String, AgentError> {
        let name = self.role.backend.model_name().ok_or_else(|| {
            AgentError::Config(format!("role {} has no model backend", self.role.name))
        })?;
        let service = self
            .backends
            .get(name)
            .ok_or_else(|| AgentError::Config(format!("backend {name} is not registered")))?;

        let request = GenerationRequest {
            role: self.role.name.clone(),
            system_prompt,
            user_prompt,
        };
        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
            stream = service.invoke(request) => stream?,
        };

        let mut transcript = String::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stream.cancel();
                    return Err(AgentError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(text)) => {
                    self.forwarder
                        .push(StreamChunk::text(&self.role.name, text.clone()));
                    transcript.push_str(&text);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if transcript.trim().is_empty() {
            return Err(AgentError::backend(
                name,
                BackendFailure::Malformed("empty generation".into()),
            ));
        }
        debug!(role = %self.role.name, bytes = transcript.len(), "Generation complete");
        Ok(transcript)
    }
}

/// Fetches price history plus whatever research tools the role is bound to.
pub struct DataRetrievalHandler;

#[async_trait]
impl RoleHandler for DataRetrievalHandler {
    async fn run(&self, ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError> {
        let ticker = ctx.ticker.as_str();
        let series: PriceSeries = env.call_typed(PRICE_HISTORY, ticker).await?;
        if series.is_empty() {
            return Err(AgentError::Data(format!("no price history for {ticker}")));
        }

        let research = MarketResearch {
            quote: env.optional::<Quote>(CURRENT_PRICE, ticker).await?,
            company: env.optional::<CompanyInfo>(COMPANY_INFO, ticker).await?,
            recommendations: env
                .optional::<Vec<AnalystRecommendation>>(ANALYST_RECOMMENDATIONS, ticker)
                .await?
                .unwrap_or_default(),
            news: env
                .optional::<Vec<NewsItem>>(COMPANY_NEWS, ticker)
                .await?
                .unwrap_or_default(),
        };
        info!(ticker, bars = series.len(), research = !research.is_empty(), "Market data retrieved");

        let update = ContextUpdate {
            price_series: Some(series.clone()),
            research: (!research.is_empty()).then_some(research.clone()),
            ..ContextUpdate::default()
        };
        let output = RoleOutput::new(update);
        if env.is_model_backed() {
            let text = env
                .generate(
                    prompts::data_retrieval_system_prompt(),
                    prompts::data_user_prompt(ticker, &series, &research),
                )
                .await?;
            Ok(output.with_streamed_fragment(text))
        } else {
            Ok(output.with_fragment(describe_data(&series, &research)))
        }
    }
}

fn describe_data(series: &PriceSeries, research: &MarketResearch) -> String {
    let bars = series.bars();
    let mut text = match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => {
            let change = if first.close != 0.0 {
                (last.close - first.close) / first.close * 100.0
            } else {
                0.0
            };
            format!(
                "{} daily bars for {} from {} to {}; last close {:.2} ({:+.1}% over the window).",
                bars.len(),
                series.ticker(),
                first.date,
                last.date,
                last.close,
                change
            )
        }
        _ => format!("No daily bars for {}.", series.ticker()),
    };
    if let Some(name) = research.company.as_ref().and_then(|c| c.name.as_deref()) {
        text.push_str(&format!(" Company: {name}."));
    }
    if let Some(rec) = research.recommendations.first() {
        text.push_str(&format!(
            " Analysts ({}): {} buy, {} hold, {} sell.",
            rec.period,
            rec.strong_buy + rec.buy,
            rec.hold,
            rec.sell + rec.strong_sell
        ));
    }
    if let Some(news) = research.news.first() {
        text.push_str(&format!(" Latest headline: {}.", news.title.trim_end_matches('.')));
    }
    text
}

/// Computes indicators and classifies them. Fetches history itself when the
/// context has none, which is the normal case for a team member.
pub struct IndicatorAnalysisHandler {
    engine: IndicatorEngine,
}

impl IndicatorAnalysisHandler {
    pub fn new(params: IndicatorParams) -> Self {
        Self {
            engine: IndicatorEngine::new(params),
        }
    }
}

#[async_trait]
impl RoleHandler for IndicatorAnalysisHandler {
    async fn run(&self, ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError> {
        let ticker = ctx.ticker.as_str();
        let (series, fetched) = match &ctx.price_series {
            Some(series) => (series.clone(), false),
            None if env.role().binds(PRICE_HISTORY) => {
                (env.call_typed::<PriceSeries>(PRICE_HISTORY, ticker).await?, true)
            }
            None => {
                return Err(AgentError::Data(format!(
                    "no price history for {ticker} and role {} cannot fetch it",
                    env.role().name
                )))
            }
        };

        let set = self.engine.compute(&series);
        let signal = classify(&set).map_err(|_| {
            AgentError::Data(format!(
                "insufficient price history for {ticker}: {} bars, need at least {}",
                series.len(),
                self.engine.params().min_bars()
            ))
        })?;
        info!(
            ticker,
            decision = %signal.decision,
            rsi = set.rsi14,
            macd = set.macd_line,
            macd_signal = set.macd_signal,
            "Signal classified"
        );

        let (fragment, streamed) = if env.is_model_backed() {
            let text = env
                .generate(
                    prompts::technical_system_prompt(),
                    prompts::technical_user_prompt(ticker, &signal),
                )
                .await?;
            (text, true)
        } else {
            (describe_indicators(ticker, &signal), false)
        };

        let update = ContextUpdate {
            price_series: fetched.then_some(series),
            indicator_set: Some(set),
            signal: Some(signal),
            ..ContextUpdate::default()
        };
        let output = RoleOutput::new(update);
        Ok(if streamed {
            output.with_streamed_fragment(fragment)
        } else {
            output.with_fragment(fragment)
        })
    }
}

/// Restates the classifier's rationale; it carries every figure the report may cite.
fn describe_indicators(ticker: &str, signal: &Signal) -> String {
    format!(
        "Technical read for {ticker}: {} Decision: {}.",
        signal.rationale, signal.decision
    )
}

/// Loads the user's lots for the ticker from the holdings tool.
pub struct PortfolioAggregationHandler;

#[async_trait]
impl RoleHandler for PortfolioAggregationHandler {
    async fn run(&self, ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError> {
        let ticker = ctx.ticker.as_str();
        let holdings: Vec<Holding> = env.call_typed(READ_HOLDINGS, ticker).await?;
        info!(ticker, lots = holdings.len(), "Holdings aggregated");

        if env.is_model_backed() && !holdings.is_empty() {
            let text = env
                .generate(
                    prompts::portfolio_system_prompt(),
                    prompts::portfolio_user_prompt(ticker, &holdings),
                )
                .await?;
            let update = ContextUpdate {
                holdings: Some(holdings),
                ..ContextUpdate::default()
            };
            return Ok(RoleOutput::new(update).with_streamed_fragment(text));
        }

        let fragment = describe_position(ticker, &holdings);
        let update = ContextUpdate {
            holdings: Some(holdings),
            ..ContextUpdate::default()
        };
        Ok(RoleOutput::new(update).with_fragment(fragment))
    }
}

fn describe_position(ticker: &str, holdings: &[Holding]) -> String {
    let Some(position) = Position::from_holdings(ticker, holdings) else {
        return format!("No {ticker} holdings found in the portfolio files.");
    };
    let mut files: Vec<&str> = holdings.iter().map(|h| h.source_file.as_str()).collect();
    files.sort_unstable();
    files.dedup();
    let average = position
        .average_cost()
        .map(|c| format!("{c} per share"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{} position: {} lots, {} shares, total cost {}, average cost {} (from {}).",
        position.ticker,
        position.lots,
        position.quantity,
        position.cost_basis,
        average,
        files.join(", ")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeStyle {
    /// Plain-language daily insight.
    Daily,
    /// Position analysis and staged sell-down plan.
    Position,
}

/// Writes the narrative for an already-classified signal.
pub struct NarrativeSynthesisHandler {
    style: NarrativeStyle,
}

impl NarrativeSynthesisHandler {
    pub fn new(style: NarrativeStyle) -> Self {
        Self { style }
    }
}

#[async_trait]
impl RoleHandler for NarrativeSynthesisHandler {
    async fn run(&self, ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError> {
        let signal = ctx.signal.as_ref().ok_or_else(|| {
            let reasons: Vec<String> = ctx
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.role, f.reason))
                .collect();
            AgentError::Data(if reasons.is_empty() {
                format!("no signal for {} to narrate", ctx.ticker)
            } else {
                format!("no signal for {} to narrate ({})", ctx.ticker, reasons.join("; "))
            })
        })?;

        if env.is_model_backed() {
            let (system, user) = match self.style {
                NarrativeStyle::Daily => (
                    prompts::narrative_system_prompt(),
                    prompts::narrative_user_prompt(ctx, signal),
                ),
                NarrativeStyle::Position => (
                    prompts::position_analysis_system_prompt(),
                    prompts::position_user_prompt(ctx, signal),
                ),
            };
            let text = env.generate(system, user).await?;
            return Ok(RoleOutput::default().with_streamed_fragment(text));
        }

        let text = prompts::plain_narrative(&ctx.ticker, signal, ctx.indicator_set.as_ref());
        Ok(RoleOutput::default().with_fragment(text))
    }
}
