//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a message plus conversation history to an LLM
//! and get a uniform [`DriverResponse`] back, either in one piece or streamed
//! chunk by chunk through a callback.
//!
//! Implementations: OpenAI-compatible endpoints (see `agentloom-providers`),
//! scripted fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// Per-request generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOptions {
    /// Fully assembled system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Temperature override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Everything a backend needs for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    /// The message being sent this turn (user input or a continuation prompt)
    pub message: Message,

    /// Prior conversation history, oldest first
    #[serde(default)]
    pub history: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,

    #[serde(default)]
    pub options: PromptOptions,
}

impl PromptRequest {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            history: Vec::new(),
            tools: Vec::new(),
            options: PromptOptions::default(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: PromptOptions) -> Self {
        self.options = options;
        self
    }
}

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information in a provider-independent shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    /// Accumulate another usage record into this one. Counters saturate.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
    }
}

/// A complete response from a backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverResponse {
    /// Generated text (may be empty when only tool calls were produced)
    pub content: String,

    /// Tool calls in the order the model emitted them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl DriverResponse {
    /// A plain text response with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }
    }

    /// A response requesting tool calls.
    pub fn tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Callback invoked with each text delta during streaming.
pub type ChunkCallback<'a> = dyn FnMut(&str) + Send + 'a;

/// The core Provider trait.
///
/// The orchestrator calls `prompt()` or `stream()` without knowing which
/// backend is being used. Implementations own retry/backoff and history
/// normalization.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn prompt(&self, request: PromptRequest) -> Result<DriverResponse, ProviderError>;

    /// Send a request, delivering text deltas through `on_chunk` as they arrive.
    ///
    /// Default implementation calls `prompt()` and delivers the content as a
    /// single chunk. Cancellation is checked before the call.
    async fn stream(
        &self,
        request: PromptRequest,
        on_chunk: &mut ChunkCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<DriverResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            r = self.prompt(request) => r?,
        };
        if !response.content.is_empty() {
            on_chunk(&response.content);
        }
        Ok(response)
    }

    /// The model currently in use.
    fn model(&self) -> String;

    /// Switch the model used for subsequent requests.
    fn set_model(&self, model: &str);

    /// Cumulative token usage across all requests made through this provider.
    fn usage(&self) -> Usage;
}
