//! Generative-text backends.
//!
//! A backend turns a prompt pair into a [`TextStream`]: a finite,
//! non-restartable sequence of text chunks that the consumer can cancel.

pub mod claude_cli;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use signalist_models::BackendConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;

pub use claude_cli::ClaudeCliService;
pub use openai::OpenAiCompatibleService;

/// Backends keyed by the name used in `model:<name>` role bindings.
pub type BackendRegistry = HashMap<String, Arc<dyn LanguageModelService>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Role the text is generated for; used for logging only.
    pub role: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[async_trait]
pub trait LanguageModelService: Send + Sync {
    fn name(&self) -> &str;

    /// Start a generation. Errors returned here happen before any text was
    /// produced; errors after that arrive as stream items.
    async fn invoke(&self, request: GenerationRequest) -> Result<TextStream, AgentError>;
}

pub type ChunkResult = Result<String, AgentError>;

/// Producer half of a [`TextStream`].
pub struct TextSender {
    tx: mpsc::Sender<ChunkResult>,
    cancel: CancellationToken,
}

impl TextSender {
    /// Returns false once the consumer has cancelled or dropped the stream.
    pub async fn send(&self, item: ChunkResult) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(item).await.is_ok()
    }

    /// Resolves when the consumer cancels or drops the stream.
    pub async fn stopped(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

/// Lazily produced text chunks in arrival order.
pub struct TextStream {
    rx: mpsc::Receiver<ChunkResult>,
    cancel: CancellationToken,
    finished: bool,
}

impl TextStream {
    pub fn channel(buffer: usize) -> (TextSender, TextStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        (
            TextSender {
                tx,
                cancel: cancel.clone(),
            },
            TextStream {
                rx,
                cancel,
                finished: false,
            },
        )
    }

    /// A stream that yields the given chunks and then ends.
    pub fn from_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<String> = chunks.into_iter().map(Into::into).collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // capacity covers every chunk
            let _ = tx.try_send(Ok(chunk));
        }
        TextStream {
            rx,
            cancel: CancellationToken::new(),
            finished: false,
        }
    }

    /// Next chunk, or `None` once the stream ended or was cancelled.
    /// An error item ends the stream.
    pub async fn next(&mut self) -> Option<ChunkResult> {
        if self.finished || self.cancel.is_cancelled() {
            return None;
        }
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        };
        match &item {
            None | Some(Err(_)) => self.finished = true,
            Some(Ok(_)) => {}
        }
        item
    }

    /// Stop the producer. Subsequent `next` calls return `None`.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, AgentError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pick a backend for the given settings: an OpenAI-compatible HTTP endpoint
/// when an API key is present, the local `claude` CLI otherwise.
pub fn service_from_config(
    name: &str,
    config: &BackendConfig,
) -> Result<Arc<dyn LanguageModelService>, AgentError> {
    if config.api_key.is_some() {
        Ok(Arc::new(OpenAiCompatibleService::new(name, config)?))
    } else {
        let mut service = ClaudeCliService::new(name, &config.model_id);
        if let Some(path) = &config.cli_path {
            service = service.with_program(path);
        }
        Ok(Arc::new(service))
    }
}
