//! Per-run settings read from environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use signalist_models::BackendConfig;
use thiserror::Error;

use signalist_agents::backend::openai::OPENROUTER_BASE_URL;

/// Backend names referenced by the role presets.
pub const DAILY_BACKEND: &str = "daily";
pub const FINANCE_BACKEND: &str = "finance";
pub const PORTFOLIO_BACKEND: &str = "portfolio";
pub const ANALYSIS_BACKEND: &str = "analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Sequential daily analysis.
    Daily,
    /// Daily analysis by a concurrent team.
    DailyTeam,
    /// Portfolio position analysis over holdings CSVs.
    Portfolio,
}

impl RunMode {
    /// Variables that must be set, in the order they are reported.
    pub fn required_variables(self) -> &'static [&'static str] {
        match self {
            RunMode::Daily => &["DAILY_ANALYSIS_MODEL", "STOCK_TICKER"],
            RunMode::DailyTeam => &["DAILY_ANALYSIS_MODEL", "STOCK_TICKER", "OPENROUTER_API_KEY"],
            RunMode::Portfolio => &[
                "PORTFOLIO_CSVS_LOCATION",
                "FINANCE_AGENT_MODEL",
                "PORTFOLIO_AGENT_MODEL",
                "PORTFOLIO_ANALYSIS_TEAM_MODEL",
                "STOCK_TICKER",
            ],
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("required environment variables are not set: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Everything one invocation needs besides the tuning config.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: RunMode,
    pub tickers: Vec<String>,
    /// Overrides the configured lookback when set.
    pub lookback_days: Option<u32>,
    pub holdings_dir: Option<PathBuf>,
    /// Market data endpoint override.
    pub market_data_url: Option<String>,
    /// Backend settings keyed by the names the role presets use.
    pub backends: BTreeMap<String, BackendConfig>,
}

impl RunSettings {
    /// Build settings for `mode`, reading variables through `lookup`.
    /// Blank values count as unset. Every missing variable is reported at once.
    pub fn from_env<F>(mode: RunMode, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let tickers = get("STOCK_TICKER").map(|raw| parse_tickers(&raw)).unwrap_or_default();
        let missing: Vec<String> = mode
            .required_variables()
            .iter()
            .filter(|var| match **var {
                "STOCK_TICKER" => tickers.is_empty(),
                other => get(other).is_none(),
            })
            .map(|var| var.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SettingsError::MissingVariables(missing));
        }

        let streaming = match get("LLM_STREAMING") {
            None => true,
            Some(raw) => parse_flag(&raw).ok_or_else(|| SettingsError::Invalid {
                var: "LLM_STREAMING".into(),
                reason: format!("expected true or false, got {raw:?}"),
            })?,
        };
        let lookback_days = get("LOOKBACK_DAYS")
            .map(|raw| match raw.parse::<u32>() {
                Ok(days) if days > 0 => Ok(days),
                _ => Err(SettingsError::Invalid {
                    var: "LOOKBACK_DAYS".into(),
                    reason: format!("expected a positive number of days, got {raw:?}"),
                }),
            })
            .transpose()?;

        let backend = |model_var: &str, api_key: Option<String>, base_url: Option<String>| {
            let mut config = BackendConfig::new(get(model_var).unwrap_or_default());
            config.api_key = api_key;
            config.base_url = base_url;
            config.streaming = streaming;
            config.cli_path = get("CLAUDE_CLI_PATH");
            config
        };
        let llm_key = get("LLM_API_KEY");
        let llm_url = get("LLM_BASE_URL");

        let mut backends = BTreeMap::new();
        match mode {
            RunMode::Daily => {
                backends.insert(
                    DAILY_BACKEND.to_string(),
                    backend("DAILY_ANALYSIS_MODEL", llm_key, llm_url),
                );
            }
            RunMode::DailyTeam => {
                let url = llm_url.or_else(|| Some(OPENROUTER_BASE_URL.to_string()));
                backends.insert(
                    DAILY_BACKEND.to_string(),
                    backend("DAILY_ANALYSIS_MODEL", get("OPENROUTER_API_KEY"), url),
                );
            }
            RunMode::Portfolio => {
                for (name, var) in [
                    (FINANCE_BACKEND, "FINANCE_AGENT_MODEL"),
                    (PORTFOLIO_BACKEND, "PORTFOLIO_AGENT_MODEL"),
                    (ANALYSIS_BACKEND, "PORTFOLIO_ANALYSIS_TEAM_MODEL"),
                ] {
                    backends.insert(name.to_string(), backend(var, llm_key.clone(), llm_url.clone()));
                }
            }
        }

        Ok(Self {
            mode,
            tickers,
            lookback_days,
            holdings_dir: get("PORTFOLIO_CSVS_LOCATION").map(PathBuf::from),
            market_data_url: get("MARKET_DATA_URL"),
            backends,
        })
    }
}

/// Comma-separated, upper-cased, de-duplicated, order kept.
fn parse_tickers(raw: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for ticker in raw.split(',').map(|t| t.trim().to_uppercase()) {
        if !ticker.is_empty() && !tickers.contains(&ticker) {
            tickers.push(ticker);
        }
    }
    tickers
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
