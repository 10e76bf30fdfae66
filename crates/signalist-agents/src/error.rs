use signalist_market::{HoldingsError, MarketDataError};
use thiserror::Error;

use crate::tools::ToolError;

/// Whether the orchestrator may try a failed role again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Fatal,
}

/// Failure reported by a language-model backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed request or response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("backend {backend}: {failure}")]
    Backend {
        backend: String,
        failure: BackendFailure,
    },

    #[error("tool error in role {role}: {source}")]
    Tool { role: String, source: ToolError },

    #[error("market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("holdings error: {0}")]
    Holdings(#[from] HoldingsError),

    #[error("role {role} timed out after {seconds} seconds")]
    Timeout { role: String, seconds: u64 },

    #[error("role {role} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        role: String,
        attempts: u32,
        source: Box<AgentError>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid plan: {0}")]
    Plan(String),
}

impl AgentError {
    pub fn backend(backend: impl Into<String>, failure: BackendFailure) -> Self {
        AgentError::Backend {
            backend: backend.into(),
            failure,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            AgentError::Timeout { .. } => FailureClass::Retryable,
            AgentError::Backend { failure, .. } => match failure {
                BackendFailure::Timeout
                | BackendFailure::RateLimited
                | BackendFailure::Transient(_) => FailureClass::Retryable,
                BackendFailure::Auth(_) | BackendFailure::Malformed(_) => FailureClass::Fatal,
            },
            AgentError::MarketData(e) => market_class(e),
            AgentError::Tool { source, .. } => match source {
                ToolError::MarketData(e) => market_class(e),
                ToolError::Interrupted { .. } => FailureClass::Retryable,
                _ => FailureClass::Fatal,
            },
            AgentError::Config(_)
            | AgentError::Data(_)
            | AgentError::Holdings(_)
            | AgentError::RetriesExhausted { .. }
            | AgentError::Cancelled
            | AgentError::Json(_)
            | AgentError::Plan(_) => FailureClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }
}

fn market_class(err: &MarketDataError) -> FailureClass {
    match err {
        MarketDataError::RateLimited { .. } | MarketDataError::Network(_) => {
            FailureClass::Retryable
        }
        MarketDataError::NotFound { .. }
        | MarketDataError::ResponseFormat(_)
        | MarketDataError::Auth(_) => FailureClass::Fatal,
    }
}
