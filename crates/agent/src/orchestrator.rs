//! The agent loop — moderate, recall, call the model, run tools, repeat.
//!
//! ```text
//! START → CALLING_MODEL ─(no tool calls)→ DONE
//!              ↑      └─(tool calls)→ CHECKING_SECURITY → EXECUTING_TOOLS → APPENDING_RESULTS ─┐
//!              └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Security blocks, iteration limits, declined confirmations, and
//! cancellation end the turn with a [`FinishReason`]; they are never errors.
//! Backend and memory failures propagate. Running past the hard iteration cap
//! is a fatal [`AgentError`].

use std::sync::Arc;

use agentloom_config::{AgentConfig, AppConfig};
use agentloom_core::error::{AgentError, Error, ProviderError};
use agentloom_core::memory::MemoryBackend;
use agentloom_core::message::{ConversationId, Message};
use agentloom_core::provider::{PromptOptions, PromptRequest, Provider, Usage};
use agentloom_core::tool::{ToolContext, ToolResult};
use agentloom_security::{SecurityGate, SecurityPolicy};
use agentloom_tools::{ToolCatalog, ToolInvoker};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::confirm::Confirmer;
use crate::prompt;
use crate::stream_event::StreamEvent;
use crate::summarizer::ProviderSummarizer;

/// Returned as content when the iteration limit ends a turn.
pub const ITERATION_LIMIT_MESSAGE: &str =
    "I've reached the maximum number of operations for this request. Please narrow it down or continue in a new message.";

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced a final answer
    Stop,
    /// A tool call was denied by the security gate
    SecurityBlocked,
    /// The security gate's iteration limit was reached
    IterationLimit,
    /// Input moderation rejected the message
    InputRejected,
    /// The caller cancelled
    Stopped,
    /// A destructive call needs the user's confirmation
    ConfirmationRequired,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::SecurityBlocked => "security_blocked",
            Self::IterationLimit => "iteration_limit",
            Self::InputRejected => "input_rejected",
            Self::Stopped => "stopped",
            Self::ConfirmationRequired => "confirmation_required",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Replaces the configured caller instructions for this call
    pub system_prompt: Option<String>,
    /// Caller identity passed to tools and the authorizer
    pub user_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// The outcome of one chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    /// Model calls made
    pub iterations: u32,
    pub tool_calls_made: u32,
    pub usage: Usage,
}

/// Receives stream events as the turn progresses.
pub type EventCallback<'a> = dyn FnMut(StreamEvent) + Send + 'a;

/// Counters for the turn in progress.
#[derive(Default)]
struct Turn {
    iterations: u32,
    tool_calls_made: u32,
    usage: Usage,
}

impl Turn {
    fn finish(&self, content: impl Into<String>, finish_reason: FinishReason) -> ChatResponse {
        ChatResponse {
            content: content.into(),
            finish_reason,
            iterations: self.iterations,
            tool_calls_made: self.tool_calls_made,
            usage: self.usage,
        }
    }
}

/// Concatenated successful tool output, used when the model ends a turn
/// with empty content after running tools.
fn fallback_answer(results: &[ToolResult]) -> String {
    results
        .iter()
        .filter(|r| r.success)
        .map(ToolResult::to_content)
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Releases streamed text a line at a time, sanitized, so a secret split
/// across chunks is never emitted in pieces.
struct LinePreview<'g> {
    gate: &'g SecurityGate,
    pending: String,
}

impl<'g> LinePreview<'g> {
    fn new(gate: &'g SecurityGate) -> Self {
        Self {
            gate,
            pending: String::new(),
        }
    }

    fn push(&mut self, chunk: &str) -> Option<String> {
        self.pending.push_str(chunk);
        let cut = self.pending.rfind('\n')? + 1;
        let ready: String = self.pending.drain(..cut).collect();
        self.release(&ready)
    }

    fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        self.release(&rest)
    }

    fn release(&self, text: &str) -> Option<String> {
        let clean = self.gate.sanitize_output(text);
        (!clean.is_empty()).then_some(clean)
    }
}

/// Drives one conversation turn against a backend, a tool catalog, a
/// security policy, and conversation memory.
pub struct AgentOrchestrator {
    provider: Arc<dyn Provider>,
    invoker: ToolInvoker,
    memory: Arc<dyn MemoryBackend>,
    security: Arc<SecurityPolicy>,
    confirmer: Option<Arc<dyn Confirmer>>,
    config: AgentConfig,
    recall_limit: usize,
}

impl AgentOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        invoker: ToolInvoker,
        memory: Arc<dyn MemoryBackend>,
        security: Arc<SecurityPolicy>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            invoker,
            memory,
            security,
            confirmer: None,
            config,
            recall_limit: 50,
        }
    }

    /// Wire everything from one configuration value. Memory summaries are
    /// written by the same backend.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, catalog: Arc<ToolCatalog>) -> Self {
        let summarizer = Arc::new(ProviderSummarizer::new(Arc::clone(&provider)));
        let memory = agentloom_memory::from_config_with(&config.memory, summarizer);
        let security = Arc::new(SecurityPolicy::new(&config.security));
        Self::new(provider, ToolInvoker::new(catalog), memory, security, config.agent.clone())
            .with_recall_limit(config.memory.recall_limit)
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Maximum history messages recalled per turn.
    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn memory(&self) -> &Arc<dyn MemoryBackend> {
        &self.memory
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Process one user message and return the final answer.
    pub async fn chat(
        &self,
        conversation_id: &ConversationId,
        message: &str,
        options: ChatOptions,
    ) -> Result<ChatResponse, Error> {
        let cancel = CancellationToken::new();
        self.run(conversation_id, message, options, &cancel, None).await
    }

    /// Like [`chat`](Self::chat), but delivers model text and tool progress
    /// to `sink` as they happen and honours `cancel`. The last event is
    /// always exactly one `done` or `error`.
    pub async fn chat_stream(
        &self,
        conversation_id: &ConversationId,
        message: &str,
        options: ChatOptions,
        sink: &mut EventCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, Error> {
        let result = self
            .run(conversation_id, message, options, cancel, Some(&mut *sink))
            .await;

        match &result {
            Ok(response) => sink(StreamEvent::Done {
                conversation_id: conversation_id.to_string(),
                content: response.content.clone(),
                finish_reason: response.finish_reason,
                iterations: response.iterations,
                tool_calls_made: response.tool_calls_made,
                usage: response.usage,
            }),
            Err(e) => sink(StreamEvent::Error { message: e.to_string() }),
        }
        result
    }

    async fn run(
        &self,
        conversation_id: &ConversationId,
        message: &str,
        options: ChatOptions,
        cancel: &CancellationToken,
        mut sink: Option<&mut EventCallback<'_>>,
    ) -> Result<ChatResponse, Error> {
        let mut turn = Turn::default();

        // Fresh counters for every call
        let gate: SecurityGate = self.security.gate();

        let check = gate.validate_input(message);
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "Your message could not be processed.".into());
            return Ok(turn.finish(reason, FinishReason::InputRejected));
        }

        info!(conversation_id = %conversation_id, agent = %self.config.name, "Processing message");

        let user_message = Message::user(check.sanitized);
        let mut history = self.memory.recall(conversation_id, self.recall_limit).await?;

        let caller_prompt = options.system_prompt.as_deref().or(self.config.system_prompt.as_deref());
        let prompt_options = PromptOptions {
            system_prompt: Some(prompt::assemble(
                caller_prompt,
                self.config.smart_resolution,
                gate.hardening_prompt(),
            )),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let tools = self.invoker.catalog().definitions_for_agent(Some(self.config.name.as_str()));

        let mut context = ToolContext::for_agent(&self.config.name).with_conversation(conversation_id.clone());
        if let Some(user_id) = options.user_id {
            context = context.with_user(user_id);
        }

        let mut outgoing = user_message.clone();
        let mut user_in_history = false;
        let mut results_this_turn: Vec<ToolResult> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                info!(conversation_id = %conversation_id, "Turn cancelled");
                return Ok(turn.finish(String::new(), FinishReason::Stopped));
            }

            if !gate.check_iteration_limit(turn.iterations) {
                warn!(
                    conversation_id = %conversation_id,
                    iterations = turn.iterations,
                    "Iteration limit reached"
                );
                return Ok(turn.finish(ITERATION_LIMIT_MESSAGE, FinishReason::IterationLimit));
            }

            if turn.iterations >= self.config.hard_iteration_cap {
                return Err(AgentError::Fatal {
                    iterations: turn.iterations,
                }
                .into());
            }

            turn.iterations += 1;
            debug!(conversation_id = %conversation_id, iteration = turn.iterations, "Calling model");

            let request = PromptRequest::new(outgoing.clone())
                .with_history(history.clone())
                .with_tools(tools.clone())
                .with_options(prompt_options.clone());

            let mut partial = String::new();
            let result = match sink.as_deref_mut() {
                Some(sink) => {
                    let mut preview = LinePreview::new(&gate);
                    let result = {
                        let mut on_chunk = |chunk: &str| {
                            partial.push_str(chunk);
                            if let Some(content) = preview.push(chunk) {
                                sink(StreamEvent::Thinking { content });
                            }
                        };
                        self.provider.stream(request, &mut on_chunk, cancel).await
                    };
                    if let Some(content) = preview.flush() {
                        sink(StreamEvent::Thinking { content });
                    }
                    result
                }
                None => tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    r = self.provider.prompt(request) => r,
                },
            };

            let response = match result {
                Ok(response) => response,
                Err(ProviderError::Cancelled) => {
                    info!(conversation_id = %conversation_id, "Model call cancelled");
                    return Ok(turn.finish(gate.sanitize_output(&partial), FinishReason::Stopped));
                }
                Err(e) => return Err(e.into()),
            };
            turn.usage.add(&response.usage);

            // ── Final answer ──
            if !response.has_tool_calls() {
                let mut content = response.content;
                if content.trim().is_empty() && results_this_turn.iter().any(|r| r.success) {
                    debug!(conversation_id = %conversation_id, "Empty answer after tools, using tool results");
                    content = fallback_answer(&results_this_turn);
                }
                let content = gate.sanitize_output(&content);

                self.memory
                    .remember_all(conversation_id, vec![user_message, Message::assistant(content.clone())])
                    .await?;

                info!(
                    conversation_id = %conversation_id,
                    iterations = turn.iterations,
                    tool_calls = turn.tool_calls_made,
                    "Turn complete"
                );
                return Ok(turn.finish(content, FinishReason::Stop));
            }

            // ── Security checks ──
            let mut confirmations = Vec::new();
            for call in &response.tool_calls {
                let decision = gate.check_tool_call(&call.name, &call.arguments);
                if !decision.allowed {
                    let reason = decision.reason.unwrap_or_else(|| "Tool call denied".into());
                    warn!(conversation_id = %conversation_id, tool = %call.name, %reason, "Tool call blocked");
                    return Ok(turn.finish(reason, FinishReason::SecurityBlocked));
                }
                if decision.requires_confirmation {
                    confirmations.push((call, decision.confirmation_prompt.unwrap_or_default()));
                }
            }

            for (call, prompt) in confirmations {
                let approved = match &self.confirmer {
                    Some(confirmer) => {
                        let approved = confirmer.confirm(&call.name, &call.arguments, &prompt).await;
                        if !approved {
                            gate.report("confirmation_declined", format!("{} was not confirmed", call.name));
                        }
                        approved
                    }
                    None => false,
                };
                if !approved {
                    info!(conversation_id = %conversation_id, tool = %call.name, "Destructive call awaits confirmation");
                    return Ok(turn.finish(prompt, FinishReason::ConfirmationRequired));
                }
            }

            // ── Execute ──
            let results = match sink.as_deref_mut() {
                None => self.invoker.execute_many(&response.tool_calls, &context).await,
                Some(sink) => {
                    let mut results = Vec::with_capacity(response.tool_calls.len());
                    for call in &response.tool_calls {
                        sink(StreamEvent::ToolStart {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments_value(),
                        });
                        let result = self.invoker.execute_call(call, &context).await;
                        sink(StreamEvent::ToolDone {
                            id: result.tool_call_id.clone(),
                            name: result.name.clone(),
                            success: result.success,
                            output: result.to_content(),
                        });
                        results.push(result);
                    }
                    results
                }
            };
            turn.tool_calls_made += results.len() as u32;

            // ── Append ──
            if !user_in_history {
                history.push(user_message.clone());
                user_in_history = true;
            }
            history.push(Message::assistant_with_tools(response.content, response.tool_calls));
            for result in &results {
                history.push(Message::tool_result(&result.tool_call_id, result.to_content()));
            }
            results_this_turn.extend(results);
            outgoing = Message::user(self.config.continuation_prompt.clone());
        }
    }
}
