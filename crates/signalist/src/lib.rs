//! Signalist - technical-signal pipeline
//!
//! Computes RSI(14) and MACD(12,26,9) over daily closes, classifies the result
//! as Buy, Hold or Sell, and has a set of agent roles fetch data and write a
//! plain-language narrative around that decision.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use signalist::config::{RunMode, RunSettings};
//! use signalist::market::YahooProvider;
//! use signalist::models::SignalistConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = RunSettings::from_env(RunMode::Daily, |k| std::env::var(k).ok())?;
//! let backends = signalist::build_backends(&settings)?;
//! let provider = Arc::new(YahooProvider::new()?);
//! let orchestrator = signalist::build_orchestrator(
//!     &settings,
//!     &SignalistConfig::default(),
//!     provider,
//!     backends,
//! )?;
//! let report = signalist::analyze(&orchestrator, settings.mode, "COF").await?;
//! println!("{}", report.summary_line);
//! # Ok(())
//! # }
//! ```

pub mod config;

pub use signalist_agents as agents;
pub use signalist_indicators as indicators;
pub use signalist_market as market;
pub use signalist_models as models;

use std::sync::Arc;

use chrono::Utc;
use signalist_agents::backend::service_from_config;
use signalist_agents::handler::NarrativeSynthesisHandler;
use signalist_agents::tools::{
    ANALYST_RECOMMENDATIONS, COMPANY_INFO, COMPANY_NEWS, CURRENT_PRICE, PRICE_HISTORY,
    READ_HOLDINGS,
};
use signalist_agents::{
    default_handlers, market_tools, AgentError, BackendRegistry, ExecutionMode, HoldingsTool,
    NarrativeStyle, Orchestrator, PipelineContext, ReportAssembler,
};
use signalist_market::{HoldingsLoader, MarketDataProvider};
use signalist_models::{AgentRole, BackendRef, Capability, Report, SignalistConfig};
use tracing::info;

use crate::config::{
    RunMode, RunSettings, ANALYSIS_BACKEND, DAILY_BACKEND, FINANCE_BACKEND, PORTFOLIO_BACKEND,
};

/// Roles for a run mode, in declared order. Team modes end with the coordinator.
pub fn roles_for(mode: RunMode) -> Vec<AgentRole> {
    let deterministic = |name: &str, capability| {
        AgentRole::new(name, capability, BackendRef::Deterministic)
    };
    let model = |name: &str, capability, backend: &str| {
        AgentRole::new(name, capability, BackendRef::model(backend))
    };

    match mode {
        RunMode::Daily => vec![
            deterministic("history", Capability::DataRetrieval).with_tools([PRICE_HISTORY]),
            deterministic("technical", Capability::IndicatorAnalysis),
            model("summary", Capability::NarrativeSynthesis, DAILY_BACKEND),
        ],
        RunMode::DailyTeam => vec![
            model("history", Capability::DataRetrieval, DAILY_BACKEND)
                .with_tools([PRICE_HISTORY, CURRENT_PRICE]),
            deterministic("technical", Capability::IndicatorAnalysis).with_tools([PRICE_HISTORY]),
            model("summary", Capability::NarrativeSynthesis, DAILY_BACKEND),
        ],
        RunMode::Portfolio => vec![
            model("portfolio", Capability::PortfolioAggregation, PORTFOLIO_BACKEND)
                .with_tools([READ_HOLDINGS]),
            model("finance", Capability::DataRetrieval, FINANCE_BACKEND).with_tools([
                PRICE_HISTORY,
                CURRENT_PRICE,
                COMPANY_INFO,
                ANALYST_RECOMMENDATIONS,
                COMPANY_NEWS,
            ]),
            deterministic("technical", Capability::IndicatorAnalysis).with_tools([PRICE_HISTORY]),
            model("position", Capability::NarrativeSynthesis, ANALYSIS_BACKEND),
        ],
    }
}

pub fn execution_mode(mode: RunMode) -> ExecutionMode {
    match mode {
        RunMode::Daily => ExecutionMode::Sequential,
        RunMode::DailyTeam | RunMode::Portfolio => ExecutionMode::Team,
    }
}

/// One service per configured backend name.
pub fn build_backends(settings: &RunSettings) -> Result<BackendRegistry, AgentError> {
    let mut registry = BackendRegistry::new();
    for (name, config) in &settings.backends {
        let service = service_from_config(name, config)?;
        info!(backend = %name, ?config, "Backend configured");
        registry.insert(name.clone(), service);
    }
    Ok(registry)
}

/// Build an Orchestrator for one ticker's run.
pub fn build_orchestrator(
    settings: &RunSettings,
    config: &SignalistConfig,
    provider: Arc<dyn MarketDataProvider>,
    backends: BackendRegistry,
) -> Result<Orchestrator, AgentError> {
    let mut pipeline = config.pipeline.clone();
    if let Some(days) = settings.lookback_days {
        pipeline.lookback_days = days;
    }

    let mut tools = market_tools(provider, pipeline.lookback_days);
    if let Some(dir) = &settings.holdings_dir {
        tools.register(Arc::new(HoldingsTool::new(HoldingsLoader::new(dir))));
    }

    let mut orchestrator =
        Orchestrator::new(pipeline, tools, backends).with_handlers(default_handlers(config.indicators));
    if settings.mode == RunMode::Portfolio {
        orchestrator = orchestrator.with_handler(
            Capability::NarrativeSynthesis,
            Arc::new(NarrativeSynthesisHandler::new(NarrativeStyle::Position)),
        );
    }
    Ok(orchestrator)
}

/// Run the mode's plan for one ticker and assemble the report.
pub async fn analyze(
    orchestrator: &Orchestrator,
    mode: RunMode,
    ticker: &str,
) -> Result<Report, AgentError> {
    let plan = orchestrator.build_plan(roles_for(mode), execution_mode(mode))?;
    let result = orchestrator.execute(&plan, PipelineContext::new(ticker)).await?;
    ReportAssembler::from_result(&result, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalist_agents::test_support::{falling_series, scripted_registry, RecordingSink};
    use signalist_agents::LanguageModelService;
    use signalist_market::StaticProvider;
    use signalist_models::Decision;
    use std::collections::BTreeMap;

    fn settings(mode: RunMode) -> RunSettings {
        RunSettings {
            mode,
            tickers: vec!["COF".into()],
            lookback_days: None,
            holdings_dir: None,
            market_data_url: None,
            backends: BTreeMap::new(),
        }
    }

    #[test]
    fn team_modes_end_with_a_narrator() {
        for mode in [RunMode::DailyTeam, RunMode::Portfolio] {
            let roles = roles_for(mode);
            assert_eq!(roles.last().unwrap().capability, Capability::NarrativeSynthesis);
            assert_eq!(execution_mode(mode), ExecutionMode::Team);
        }
        assert_eq!(execution_mode(RunMode::Daily), ExecutionMode::Sequential);
    }

    #[test]
    fn portfolio_plan_needs_the_holdings_tool() {
        let provider = Arc::new(StaticProvider::new());
        let mut backends = BackendRegistry::new();
        for name in [FINANCE_BACKEND, PORTFOLIO_BACKEND, ANALYSIS_BACKEND] {
            backends.extend(scripted_registry(name, ["text"]));
        }

        let without_dir = build_orchestrator(
            &settings(RunMode::Portfolio),
            &SignalistConfig::default(),
            provider.clone(),
            backends.clone(),
        )
        .unwrap();
        let err = without_dir
            .build_plan(roles_for(RunMode::Portfolio), ExecutionMode::Team)
            .unwrap_err();
        assert!(err.to_string().contains(READ_HOLDINGS));

        let mut with_dir = settings(RunMode::Portfolio);
        with_dir.holdings_dir = Some(std::env::temp_dir());
        let orchestrator =
            build_orchestrator(&with_dir, &SignalistConfig::default(), provider, backends).unwrap();
        assert!(orchestrator
            .build_plan(roles_for(RunMode::Portfolio), ExecutionMode::Team)
            .is_ok());
    }

    #[tokio::test]
    async fn daily_run_streams_and_reports() {
        let provider = Arc::new(StaticProvider::new().with_series(falling_series("COF", 100)));
        let backends = scripted_registry(DAILY_BACKEND, ["The slide ", "is losing steam."]);
        assert_eq!(backends[DAILY_BACKEND].name(), DAILY_BACKEND);

        let orchestrator = build_orchestrator(
            &settings(RunMode::Daily),
            &SignalistConfig::default(),
            provider,
            backends,
        )
        .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let drain = tokio::spawn(orchestrator.forwarder().drain_into(sink.clone()));

        let report = analyze(&orchestrator, RunMode::Daily, "cof").await.unwrap();
        orchestrator.forwarder().close();
        drain.await.unwrap();

        assert_eq!(report.ticker, "COF");
        assert_eq!(report.decision, Decision::Buy);
        let streamed = sink.text();
        assert!(streamed.starts_with("100 daily bars for COF"), "{streamed}");
        assert!(streamed.contains(&format!("Technical read for COF: {}", report.rationale)));
        assert!(streamed.ends_with("The slide is losing steam.\n\n"));
        assert!(report.summary_line.contains("COF: Buy."));
    }
}
