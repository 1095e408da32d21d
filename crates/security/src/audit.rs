//! Audit logging — a lifecycle event subscriber.
//!
//! [`AuditLogger`] implements [`EventSink`], so it can be handed straight to
//! the tool invoker and the security policy. Every event becomes an
//! [`AuditEntry`] that is kept in memory and forwarded to the sinks.

use std::sync::{Mutex, PoisonError};

use agentloom_core::event::{EventSink, ToolEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// Event name, e.g. `tool_executed`
    pub event: String,
    /// Tool name, or the violation kind for security events
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Attempted,
    Success,
    Failure,
    Denied,
}

impl From<&ToolEvent> for AuditEntry {
    fn from(event: &ToolEvent) -> Self {
        let name = event.name().to_string();
        match event {
            ToolEvent::ToolCalled { tool, arguments, timestamp } => Self {
                timestamp: *timestamp,
                event: name,
                target: tool.clone(),
                outcome: AuditOutcome::Attempted,
                details: Some(arguments.to_string()),
            },
            ToolEvent::ToolExecuted { tool, duration_ms, timestamp, .. } => Self {
                timestamp: *timestamp,
                event: name,
                target: tool.clone(),
                outcome: AuditOutcome::Success,
                details: Some(format!("{duration_ms}ms")),
            },
            ToolEvent::ToolFailed { tool, error, timestamp, .. } => Self {
                timestamp: *timestamp,
                event: name,
                target: tool.clone(),
                outcome: AuditOutcome::Failure,
                details: Some(error.clone()),
            },
            ToolEvent::SecurityViolation { kind, details, timestamp } => Self {
                timestamp: *timestamp,
                event: name,
                target: kind.clone(),
                outcome: AuditOutcome::Denied,
                details: Some(details.clone()),
            },
        }
    }
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit trail with pluggable sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
    capacity: usize,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Keeps the most recent 1000 entries.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
            capacity: 1000,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn record(&self, entry: AuditEntry) {
        for sink in &self.sinks {
            sink.record(&entry);
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            let overflow = entries.len() + 1 - self.capacity;
            entries.drain(..overflow);
        }
        entries.push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn entries_by_outcome(&self, outcome: AuditOutcome) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl EventSink for AuditLogger {
    fn emit(&self, event: ToolEvent) {
        self.record(AuditEntry::from(&event));
    }
}

/// Writes entries through `tracing`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        match entry.outcome {
            AuditOutcome::Denied | AuditOutcome::Failure => tracing::warn!(
                event = %entry.event,
                target = %entry.target,
                outcome = ?entry.outcome,
                details = ?entry.details,
                "AUDIT"
            ),
            _ => tracing::info!(
                event = %entry.event,
                target = %entry.target,
                outcome = ?entry.outcome,
                details = ?entry.details,
                "AUDIT"
            ),
        }
    }
}
