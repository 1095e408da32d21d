//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling with uniform call ids and object arguments
//! - Retry/backoff on 429, 5xx and transport failures
//! - Cumulative token usage accounting

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use agentloom_config::ProviderConfig;
use agentloom_core::error::ProviderError;
use agentloom_core::message::{Message, Role, ToolCall};
use agentloom_core::provider::*;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::history::normalize_history;
use crate::retry::{RetryPolicy, SendOutcome, parse_retry_after, send_with_retry};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: RwLock<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
    client: reqwest::Client,
    usage: Mutex<Usage>,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::build(name.into(), base_url.into(), api_key, model.into(), 120)
    }

    /// Build a provider from the `[provider]` config section.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_none() && config.name != "ollama" {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{}'",
                config.name
            )));
        }
        let mut provider = Self::build(
            config.name.clone(),
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.timeout_secs,
        )?;
        provider.temperature = config.temperature;
        provider.max_tokens = config.max_tokens;
        provider.retry = RetryPolicy::from(&config.retry);
        Ok(provider)
    }

    fn build(
        name: String,
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: RwLock::new(model),
            temperature: 0.7,
            max_tokens: None,
            retry: RetryPolicy::default(),
            client,
            usage: Mutex::new(Usage::default()),
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key.into()), "gpt-4o-mini")
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            Some(api_key.into()),
            "openai/gpt-4o-mini",
        )
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: &str) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            None,
            model,
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Outgoing message list: system prompt, repaired history, current message.
    fn to_api_messages(request: &PromptRequest) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(request.history.len() + 2);

        if let Some(system) = request.options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            out.push(ApiMessage::from(&Message::system(system)));
        }
        out.extend(normalize_history(&request.history).iter().map(ApiMessage::from));
        out.push(ApiMessage::from(&request.message));
        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolSpec]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(&self, request: &PromptRequest, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.model(),
            "messages": Self::to_api_messages(request),
            "temperature": request.options.temperature.unwrap_or(self.temperature),
            "stream": stream,
        });

        if let Some(max_tokens) = request.options.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    /// One HTTP attempt. Success hands back the live response for the caller
    /// to consume; failures carry status, `Retry-After` and body.
    async fn send_once(
        &self,
        body: &Value,
        stream: bool,
    ) -> Result<SendOutcome<reqwest::Response>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        if stream {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(SendOutcome::Success(response));
        }

        let retry_after = parse_retry_after(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();
        Ok(SendOutcome::Status {
            status: status.as_u16(),
            retry_after,
            body,
        })
    }

    fn record_usage(&self, usage: &Usage) {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(usage);
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Synthesize a call id when the backend sent none.
fn normalize_call_id(id: &str) -> String {
    if id.trim().is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        id.to_string()
    }
}

/// Tool arguments arrive either as a JSON-encoded string or as an object.
fn parse_arguments(tool: &str, raw: Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(tool, arguments = %other, "Tool arguments are not an object; using {{}}");
                Map::new()
            }
            Err(e) => {
                warn!(tool, error = %e, "Unparseable tool arguments; using {{}}");
                Map::new()
            }
        },
        other => {
            warn!(tool, arguments = %other, "Tool arguments are not an object; using {{}}");
            Map::new()
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prompt(&self, request: PromptRequest) -> Result<DriverResponse, ProviderError> {
        let body = self.request_body(&request, false);
        debug!(provider = %self.name, model = %self.model(), "Sending completion request");

        // `prompt` has no caller-visible cancellation; a fresh token never fires.
        let never = CancellationToken::new();
        let response =
            send_with_retry(&self.retry, &never, |_| self.send_once(&body, false)).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let driver_response = api_response.into_driver_response()?;
        self.record_usage(&driver_response.usage);
        Ok(driver_response)
    }

    async fn stream(
        &self,
        request: PromptRequest,
        on_chunk: &mut ChunkCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<DriverResponse, ProviderError> {
        let body = self.request_body(&request, true);
        debug!(provider = %self.name, model = %self.model(), "Sending streaming request");

        let response =
            send_with_retry(&self.retry, cancel, |_| self.send_once(&body, true)).await?;

        let mut byte_stream = response.bytes_stream();
        // Raw bytes: a UTF-8 sequence may be split across network chunks
        let mut buffer: Vec<u8> = Vec::new();
        let mut state = StreamState::default();

        while !state.done {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                next = byte_stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let bytes = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
            buffer.extend_from_slice(&bytes);

            while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(delta) = state.feed_line(line.trim_end_matches(['\r', '\n'])) {
                    on_chunk(&delta);
                }
                if state.done {
                    break;
                }
            }
        }

        if !state.done {
            let rest = String::from_utf8_lossy(&buffer);
            if !rest.trim().is_empty()
                && let Some(delta) = state.feed_line(rest.trim_end())
            {
                on_chunk(&delta);
            }
        }

        let driver_response = state.finish();
        self.record_usage(&driver_response.usage);
        Ok(driver_response)
    }

    fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_model(&self, model: &str) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model.to_string();
    }

    fn usage(&self) -> Usage {
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Streaming state ---

/// Incremental SSE parser for one streamed completion.
#[derive(Default)]
struct StreamState {
    content: String,
    tools: BTreeMap<u32, ToolCallAccumulator>,
    usage: Usage,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamState {
    /// Consume one SSE line; returns the text delta it carried, if any.
    fn feed_line(&mut self, line: &str) -> Option<String> {
        // Skip empty lines, SSE comments and non-data fields
        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() {
            return None;
        }
        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return None;
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }

        let choice = chunk.choices.into_iter().next()?;
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.tools.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                acc.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    acc.name.push_str(&name);
                }
                if let Some(args) = function.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }

        let text = choice.delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&text);
        Some(text)
    }

    fn finish(self) -> DriverResponse {
        let tool_calls = self
            .tools
            .into_values()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        DriverResponse {
            content: self.content,
            tool_calls,
            usage: self.usage,
            finish_reason: self.finish_reason,
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        let arguments = parse_arguments(&self.name, Value::String(self.arguments));
        ToolCall::new(normalize_call_id(&self.id), self.name, arguments)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for ApiMessage {
    fn from(m: &Message) -> Self {
        let tool_calls = (!m.tool_calls.is_empty()).then(|| {
            m.tool_calls
                .iter()
                .map(|tc| ApiToolCall {
                    id: tc.id.clone(),
                    r#type: "function",
                    function: ApiFunction {
                        name: tc.name.clone(),
                        arguments: tc.arguments_value().to_string(),
                    },
                })
                .collect()
        });

        // Assistant turns that only call tools carry null content.
        let content = if m.role == Role::Assistant && tool_calls.is_some() && m.content.is_empty() {
            None
        } else {
            Some(m.content.clone())
        };

        Self {
            role: m.role.as_str(),
            content,
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

impl ApiResponse {
    fn into_driver_response(self) -> Result<DriverResponse, ProviderError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = parse_arguments(&tc.function.name, tc.function.arguments);
                ToolCall::new(normalize_call_id(&tc.id), tc.function.name, arguments)
            })
            .collect();

        Ok(DriverResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: self.usage.map(Usage::from).unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseToolCall {
    #[serde(default)]
    id: String,
    function: ApiResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ApiResponseFunction {
    name: String,
    /// Usually a JSON string; some compatible servers send an object.
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
