//! Security layer for agentloom — input moderation, tool-call vetting, and
//! output sanitization.
//!
//! Provides:
//! - **Gate**: Length limits, invisible-character stripping, prompt-injection detection
//! - **Tool checks**: Per-request call quota and destructive-action confirmation
//! - **Output sanitization**: Secret, prompt-leakage, and active-HTML removal
//! - **Audit logging**: Structured record of lifecycle events

pub mod audit;
pub mod gate;
pub mod patterns;

pub use audit::{AuditEntry, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use gate::{HARDENING_PROMPT, InputCheck, SecurityDecision, SecurityGate, SecurityPolicy};
