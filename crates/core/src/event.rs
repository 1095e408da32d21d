//! Lifecycle events — decoupled audit/observability hooks.
//!
//! The invoker and security gate publish events through an [`EventSink`].
//! The [`EventBus`] fans them out to any number of subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All lifecycle events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// A tool is about to run
    ToolCalled {
        tool: String,
        arguments: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// A tool finished successfully
    ToolExecuted {
        tool: String,
        arguments: serde_json::Value,
        result: serde_json::Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool failed
    ToolFailed {
        tool: String,
        arguments: serde_json::Value,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Input or a tool call was refused by the security gate
    SecurityViolation {
        kind: String,
        details: String,
        timestamp: DateTime<Utc>,
    },
}

impl ToolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolCalled { .. } => "tool_called",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::ToolFailed { .. } => "tool_failed",
            Self::SecurityViolation { .. } => "security_violation",
        }
    }

    pub fn security_violation(kind: impl Into<String>, details: impl Into<String>) -> Self {
        Self::SecurityViolation {
            kind: kind.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives lifecycle events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ToolEvent);
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ToolEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ToolEvent>> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: ToolEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
