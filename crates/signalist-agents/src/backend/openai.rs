//! OpenAI-compatible `/chat/completions` backend (OpenRouter and friends).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use signalist_models::BackendConfig;
use tracing::{debug, warn};

use super::{GenerationRequest, LanguageModelService, TextSender, TextStream};
use crate::error::{AgentError, BackendFailure};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const STREAM_BUFFER: usize = 64;

pub struct OpenAiCompatibleService {
    name: String,
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    streaming: bool,
}

impl OpenAiCompatibleService {
    pub fn new(name: impl Into<String>, config: &BackendConfig) -> Result<Self, AgentError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AgentError::Config(format!("no API key for model {}", config.model_id)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            client,
            model: config.model_id.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            streaming: config.streaming,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "stream": self.streaming,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
        })
    }

    fn fail(&self, failure: BackendFailure) -> AgentError {
        AgentError::backend(&self.name, failure)
    }
}

#[async_trait]
impl LanguageModelService for OpenAiCompatibleService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: GenerationRequest) -> Result<TextStream, AgentError> {
        debug!(model = %self.model, role = %request.role, streaming = self.streaming, "Chat completion request");

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| self.fail(request_failure(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Chat completion rejected");
            return Err(self.fail(status_failure(status, &text)));
        }

        if !self.streaming {
            let body: ChatResponse = resp
                .json()
                .await
                .map_err(|e| self.fail(BackendFailure::Malformed(e.to_string())))?;
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| self.fail(BackendFailure::Malformed("no choices".into())))?;
            return Ok(TextStream::from_chunks([content]));
        }

        let (tx, stream) = TextStream::channel(STREAM_BUFFER);
        let backend = self.name.clone();
        tokio::spawn(async move {
            pump_events(backend, resp, tx).await;
        });
        Ok(stream)
    }
}

async fn pump_events(backend: String, resp: reqwest::Response, tx: TextSender) {
    let mut bytes = resp.bytes_stream();
    let mut decoder = SseDecoder::default();

    loop {
        let next = tokio::select! {
            _ = tx.stopped() => return,
            next = bytes.next() => next,
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tx.send(Err(AgentError::backend(&backend, request_failure(&e)))).await;
                return;
            }
            None => return,
        };

        for event in decoder.push(&chunk) {
            match event {
                SseEvent::Done => return,
                SseEvent::Data(data) => match parse_delta(&data) {
                    Ok(Some(text)) => {
                        if !tx.send(Ok(text)).await {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(failure) => {
                        tx.send(Err(AgentError::backend(&backend, failure))).await;
                        return;
                    }
                },
            }
        }
    }
}

fn request_failure(err: &reqwest::Error) -> BackendFailure {
    if err.is_timeout() {
        BackendFailure::Timeout
    } else {
        BackendFailure::Transient(err.to_string())
    }
}

fn status_failure(status: StatusCode, body: &str) -> BackendFailure {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendFailure::Auth(format!("{status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => BackendFailure::RateLimited,
        StatusCode::REQUEST_TIMEOUT => BackendFailure::Timeout,
        s if s.is_server_error() => BackendFailure::Transient(format!("{status}: {body}")),
        _ => BackendFailure::Malformed(format!("{status}: {body}")),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Text carried by one streamed completion chunk, if any.
fn parse_delta(data: &str) -> Result<Option<String>, BackendFailure> {
    let chunk: ChunkResponse = serde_json::from_str(data)
        .map_err(|e| BackendFailure::Malformed(format!("bad stream chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(BackendFailure::Transient(format!("stream error: {error}")));
    }
    Ok(chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .find(|text| !text.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Incremental server-sent-events decoder. Only `data:` fields are kept;
/// comments (`: OPENROUTER PROCESSING`) and other fields are skipped.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}
