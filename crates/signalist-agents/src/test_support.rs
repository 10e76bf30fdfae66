//! Test support: synthetic price series, scripted backends and recording handlers.
//!
//! Used by unit tests in this crate and by the scenario tests under `tests/`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use signalist_models::{PriceBar, PriceSeries};

use crate::backend::{BackendRegistry, GenerationRequest, LanguageModelService, TextStream};
use crate::context::PipelineContext;
use crate::error::{AgentError, BackendFailure};
use crate::handler::{RoleEnv, RoleHandler, RoleOutput};
use crate::stream::{OutputSink, StreamChunk};

fn series_from(ticker: &str, closes: impl Iterator<Item = f64>) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default();
    let bars = closes
        .enumerate()
        .map(|(i, close)| PriceBar {
            date: start + Days::new(i as u64),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1_000_000,
        })
        .collect();
    PriceSeries::from_unsorted(ticker, bars)
}

/// Decelerating rally: `100 - 50 * 0.95^t`. Overbought with the MACD line
/// under its signal line once enough bars exist, so it classifies as Sell.
pub fn rising_series(ticker: &str, len: usize) -> PriceSeries {
    series_from(ticker, (0..len).map(|t| 100.0 - 50.0 * 0.95f64.powi(t as i32)))
}

/// Decelerating slide: `50 + 50 * 0.95^t`. Classifies as Buy at 100 bars.
pub fn falling_series(ticker: &str, len: usize) -> PriceSeries {
    series_from(ticker, (0..len).map(|t| 50.0 + 50.0 * 0.95f64.powi(t as i32)))
}

enum Step {
    Fail(BackendFailure),
    Hang,
}

/// A language-model backend that replays canned chunks, optionally after a
/// scripted run of failures or hangs.
pub struct ScriptedBackend {
    name: String,
    chunks: Vec<String>,
    steps: Mutex<VecDeque<Step>>,
    chunk_delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new<I, S>(name: &str, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            chunks: chunks.into_iter().map(Into::into).collect(),
            steps: Mutex::new(VecDeque::new()),
            chunk_delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `times` invocations with `failure`.
    pub fn failing(self, times: usize, failure: BackendFailure) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.extend((0..times).map(|_| Step::Fail(failure.clone())));
        }
        self
    }

    /// Never answer the next `times` invocations.
    pub fn hanging(self, times: usize) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.extend((0..times).map(|_| Step::Hang));
        }
        self
    }

    /// Sleep between chunks instead of yielding them all at once.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModelService for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _request: GenerationRequest) -> Result<TextStream, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Step::Fail(failure)) => return Err(AgentError::backend(&self.name, failure)),
            Some(Step::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        let Some(delay) = self.chunk_delay else {
            return Ok(TextStream::from_chunks(self.chunks.clone()));
        };
        let (tx, stream) = TextStream::channel(1);
        let chunks = self.chunks.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                if !tx.send(Ok(chunk)).await {
                    return;
                }
            }
        });
        Ok(stream)
    }
}

/// A registry holding one [`ScriptedBackend`].
pub fn scripted_registry<I, S>(name: &str, chunks: I) -> BackendRegistry
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut registry = BackendRegistry::new();
    registry.insert(
        name.to_string(),
        Arc::new(ScriptedBackend::new(name, chunks)) as Arc<dyn LanguageModelService>,
    );
    registry
}

/// Shared, ordered log of `start:<role>` / `end:<role>` events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn record(&self, event: String) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// Records when each role starts and ends, optionally sleeping per role.
/// Writes a `<role> done` fragment and nothing else.
#[derive(Default)]
pub struct RecordingHandler {
    log: EventLog,
    delays: HashMap<String, Duration>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharing(log: EventLog) -> Self {
        Self {
            log,
            delays: HashMap::new(),
        }
    }

    pub fn with_delay(mut self, role: &str, delay: Duration) -> Self {
        self.delays.insert(role.to_string(), delay);
        self
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.events()
    }
}

#[async_trait]
impl RoleHandler for RecordingHandler {
    async fn run(&self, _ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError> {
        let name = env.role().name.clone();
        self.log.record(format!("start:{name}"));
        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }
        self.log.record(format!("end:{name}"));
        Ok(RoleOutput::default().with_fragment(format!("{name} done")))
    }
}

enum Flake {
    Timeouts,
    Hangs,
    Fatal,
}

/// Misbehaves for the first `times` calls, then succeeds.
pub struct FlakyHandler {
    mode: Flake,
    times: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    /// Backend timeouts, which the orchestrator retries.
    pub fn timeouts(times: u32) -> Self {
        Self::with_mode(Flake::Timeouts, times)
    }

    /// Never returns, so the role timeout fires.
    pub fn hangs(times: u32) -> Self {
        Self::with_mode(Flake::Hangs, times)
    }

    /// Always fails with a data error.
    pub fn fatal() -> Self {
        Self::with_mode(Flake::Fatal, u32::MAX)
    }

    fn with_mode(mode: Flake, times: u32) -> Self {
        Self {
            mode,
            times,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleHandler for FlakyHandler {
    async fn run(&self, _ctx: &PipelineContext, env: &RoleEnv) -> Result<RoleOutput, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.times {
            return Ok(RoleOutput::default().with_fragment(format!("{} recovered", env.role().name)));
        }
        match self.mode {
            Flake::Timeouts => Err(AgentError::backend("flaky", BackendFailure::Timeout)),
            Flake::Hangs => {
                std::future::pending::<()>().await;
                Ok(RoleOutput::default())
            }
            Flake::Fatal => Err(AgentError::Data(format!("{} has no data", env.role().name))),
        }
    }
}

/// Collects everything written to it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<StreamChunk>>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<StreamChunk> {
        self.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Concatenated text of every text chunk.
    pub fn text(&self) -> String {
        self.chunks()
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Text { text, .. } => Some(text.as_str()),
                StreamChunk::Elided { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn write(&self, chunk: StreamChunk) -> std::io::Result<()> {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push(chunk);
        }
        Ok(())
    }
}
