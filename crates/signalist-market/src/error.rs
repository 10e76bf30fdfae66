use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("symbol not found: {symbol}")]
    NotFound { symbol: String },

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("authentication required: {0}")]
    Auth(String),
}

#[derive(Error, Debug)]
pub enum HoldingsError {
    #[error("cannot read holdings directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{file} line {line}: {reason}")]
    MalformedRow {
        file: String,
        line: u64,
        reason: String,
    },

    #[error("{file}: {source}")]
    Csv { file: String, source: csv::Error },
}
