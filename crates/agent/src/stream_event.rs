//! Agent-level streaming events.
//!
//! `StreamEvent` is what [`chat_stream`](crate::AgentOrchestrator::chat_stream)
//! hands to its sink. Transports render each event as one SSE frame:
//!
//! - `thinking`  — partial text from the model
//! - `tool_start` — a tool call is about to run
//! - `tool_done` — a tool call finished (successfully or not)
//! - `done`      — the turn is complete
//! - `error`     — the turn failed
//!
//! Exactly one `done` or `error` ends a turn.

use agentloom_core::provider::Usage;
use serde::{Deserialize, Serialize};

use crate::orchestrator::FinishReason;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text token from the model.
    Thinking { content: String },

    ToolStart {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolDone {
        id: String,
        name: String,
        success: bool,
        output: String,
    },

    /// Final content and turn metadata.
    Done {
        conversation_id: String,
        content: String,
        finish_reason: FinishReason,
        iterations: u32,
        tool_calls_made: u32,
        usage: Usage,
    },

    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// One SSE frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        // Serializing a derive(Serialize) enum of strings and JSON values cannot fail
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("event: {}\ndata: {data}\n\n", self.event_type())
    }
}
