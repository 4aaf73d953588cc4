//! OpenAI-compatible chat and embeddings over HTTP.
//!
//! One client covers both capabilities against the same base URL. Requests
//! that fail transiently (connect errors, 429, 5xx) retry with exponential
//! backoff before surfacing a [`ProviderError`].

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::settings::Settings;

use super::{
    ChatModel, Embedder, PlanOutcome, PromptMessage, ProviderError, TokenStream, ToolCallRequest,
    ToolSpec,
};

const DEFAULT_MAX_RETRIES: usize = 3;
const BACKOFF_BASE_MS: u64 = 500;
const MAX_BACKOFF_SHIFT: usize = 5;

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    embedding_dim: usize,
    max_retries: usize,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        chat_model: &str,
        embedding_model: &str,
        embedding_dim: usize,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            chat_model: chat_model.to_string(),
            embedding_model: embedding_model.to_string(),
            embedding_dim,
            max_retries: DEFAULT_MAX_RETRIES,
            temperature: 0.2,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        Self::new(
            &settings.api_base_url,
            &settings.api_key,
            &settings.chat_model,
            &settings.embedding_model,
            settings.embedding_dim,
        )
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// POSTs `body`, retrying transient failures with backoff.
    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{path}", self.base_url);
        let mut attempt = 0usize;
        loop {
            let mut request = self.http.post(&url).json(body);
            if !self.api_key.is_empty() {
                request = request.bearer_auth(&self.api_key);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retryable = status == 429 || (500..=599).contains(&status);
                    if retryable && attempt < self.max_retries {
                        let delay = backoff(attempt);
                        warn!(url, status, attempt, ?delay, "capability returned retryable status");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let message = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Status {
                        status,
                        message: clip(&message, 400),
                    });
                }
                Err(err) => {
                    if attempt < self.max_retries {
                        let delay = backoff(attempt);
                        warn!(url, attempt, ?delay, error = %err, "capability request failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Transport {
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn chat_body<'a>(
        &'a self,
        history: &'a [PromptMessage],
        tools: Option<&'a [ToolSpec]>,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.chat_model,
            messages: history.iter().map(WireMessage::from).collect(),
            tools: tools
                .filter(|t| !t.is_empty())
                .map(|t| t.iter().map(WireTool::from).collect()),
            stream: stream.then_some(true),
            temperature: self.temperature,
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * (1u64 << attempt.min(MAX_BACKOFF_SHIFT)))
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn plan(
        &self,
        history: &[PromptMessage],
        tools: &[ToolSpec],
    ) -> Result<PlanOutcome, ProviderError> {
        let body = self.chat_body(history, Some(tools), false);
        let response = self.post_json("chat/completions", &body).await?;
        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|err| ProviderError::Decode {
                message: err.to_string(),
            })?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(ProviderError::Decode {
                message: "completion carried no choices".to_string(),
            });
        };
        let calls = choice.message.tool_calls.unwrap_or_default();
        if calls.is_empty() {
            Ok(PlanOutcome::Answer(
                choice.message.content.unwrap_or_default(),
            ))
        } else {
            debug!(count = calls.len(), "model requested tool calls");
            Ok(PlanOutcome::ToolCalls(
                calls.into_iter().map(ToolCallRequest::from).collect(),
            ))
        }
    }

    async fn stream_answer(&self, history: &[PromptMessage]) -> Result<TokenStream, ProviderError> {
        let body = self.chat_body(history, None, true);
        let response = self.post_json("chat/completions", &body).await?;
        let stream = try_stream! {
            let mut bytes = response.bytes_stream();
            let mut pending = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|err| ProviderError::Transport {
                    message: err.to_string(),
                })?;
                pending.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim_end_matches('\r').to_string();
                    pending.drain(..=newline);
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'read;
                    }
                    let event: StreamEvent =
                        serde_json::from_str(data).map_err(|err| ProviderError::Decode {
                            message: err.to_string(),
                        })?;
                    let text = event
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .unwrap_or_default();
                    if !text.is_empty() {
                        yield text;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn complete(&self, history: &[PromptMessage]) -> Result<String, ProviderError> {
        let body = self.chat_body(history, None, false);
        let response = self.post_json("chat/completions", &body).await?;
        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|err| ProviderError::Decode {
                message: err.to_string(),
            })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Decode {
                message: "completion carried no content".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    fn dimensions(&self) -> usize {
        self.embedding_dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
            dimensions: self.embedding_dim,
        };
        let response = self.post_json("embeddings", &body).await?;
        let parsed: EmbeddingResponse =
            response.json().await.map_err(|err| ProviderError::Decode {
                message: err.to_string(),
            })?;
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::EmbeddingCount {
                requested: texts.len(),
                received: parsed.data.len(),
            });
        }
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        for item in &data {
            if item.embedding.len() != self.embedding_dim {
                return Err(ProviderError::EmbeddingDim {
                    expected: self.embedding_dim,
                    received: item.embedding.len(),
                });
            }
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&PromptMessage> for WireMessage {
    fn from(message: &PromptMessage) -> Self {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(message.tool_calls.iter().map(WireToolCall::from).collect())
        };
        Self {
            role: message.role.clone(),
            content: message.content.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction<'a>,
}

#[derive(Serialize)]
struct WireToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireToolFunction {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireCallFunction,
}

#[derive(Serialize, Deserialize)]
struct WireCallFunction {
    name: String,
    /// JSON-encoded arguments object, per the wire format.
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ToolCallRequest> for WireToolCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            kind: "function".to_string(),
            function: WireCallFunction {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

impl From<WireToolCall> for ToolCallRequest {
    fn from(call: WireToolCall) -> Self {
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or(serde_json::Value::String(call.function.arguments));
        Self {
            id: call.id,
            name: call.function.name,
            arguments,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
