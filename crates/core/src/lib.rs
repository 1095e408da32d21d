//! # agentloom Core
//!
//! Domain types, collaborator traits, and error definitions for the agentloom
//! orchestration core. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (LLM backend, memory store, authorization,
//! audit sink, tool handler) is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod auth;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use auth::{AllowAll, Authorizer};
pub use error::{AgentError, Error, FieldError, MemoryError, ProviderError, Result, ToolError};
pub use event::{EventBus, EventSink, ToolEvent};
pub use memory::{ConversationSummary, MemoryBackend};
pub use message::{Conversation, ConversationId, ConversationMetadata, Message, Role, ToolCall};
pub use provider::{DriverResponse, PromptOptions, PromptRequest, Provider, ToolSpec, Usage};
pub use tool::{ToolContext, ToolHandler, ToolOutput, ToolResult, Transformable};
