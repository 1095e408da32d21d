//! Conversation memory for agentloom.
//!
//! [`ConversationMemory`] implements the core `MemoryBackend` contract on top
//! of a pluggable [`ConversationStore`], summarizing older history as the
//! conversation grows.

pub mod conversation;
pub mod file_backend;
pub mod noop;
pub mod session;
pub mod store;
pub mod summarizer;

pub use conversation::{ConversationMemory, from_config, from_config_with};
pub use file_backend::FileStore;
pub use noop::NoopMemory;
pub use session::SessionStore;
pub use store::ConversationStore;
pub use summarizer::{ExtractiveSummarizer, Summarizer, transcript, truncate_chars};
