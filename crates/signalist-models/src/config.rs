use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::indicator::IndicatorParams;

/// Top-level tuning configuration, loaded from TOML. Every field has a default,
/// so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SignalistConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub indicators: IndicatorParams,
}

/// Configuration for the orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timeout for a single role invocation in seconds.
    pub role_timeout_seconds: u64,
    /// Time a team barrier waits for its members in seconds.
    pub team_timeout_seconds: u64,
    /// Attempts per role, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_backoff_ms: u64,
    /// Cap on a single retry delay.
    pub max_backoff_ms: u64,
    /// How long an in-flight role may run after cancellation.
    pub cancel_grace_seconds: u64,
    /// Pending stream chunks held before the oldest are collapsed.
    pub stream_buffer_chunks: usize,
    /// Calendar days of daily history to request.
    pub lookback_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            role_timeout_seconds: 60,
            team_timeout_seconds: 180,
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            cancel_grace_seconds: 5,
            stream_buffer_chunks: 64,
            lookback_days: 100,
        }
    }
}

impl PipelineConfig {
    pub fn role_timeout(&self) -> Duration {
        Duration::from_secs(self.role_timeout_seconds)
    }

    pub fn team_timeout(&self) -> Duration {
        Duration::from_secs(self.team_timeout_seconds)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_seconds)
    }
}

/// Connection settings for a generative-text backend.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Endpoint override. Defaults are chosen by the backend.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Executable for CLI-driven backends; `claude` on PATH when unset.
    #[serde(default)]
    pub cli_path: Option<String>,
}

impl BackendConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            streaming: true,
            cli_path: None,
        }
    }
}

// api_key is kept out of logs
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("streaming", &self.streaming)
            .field("cli_path", &self.cli_path)
            .finish()
    }
}

fn default_true() -> bool {
    true
}
