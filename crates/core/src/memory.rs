//! Memory trait — bounded per-conversation message storage.
//!
//! The orchestrator only ever sees this contract. Implementations decide
//! where messages live (request/session scope, a durable store, or nowhere)
//! and whether older history is summarized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::{ConversationId, Message};

/// A listing entry for one stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The core MemoryBackend trait.
///
/// Implementations must give read-after-write consistency per conversation id.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "session", "file", "none").
    fn name(&self) -> &str;

    /// Append a message to a conversation, creating it on first use.
    async fn remember(&self, conversation_id: &ConversationId, message: Message) -> Result<(), MemoryError>;

    /// Append several messages. Backends that can should write them as one
    /// unit; the default appends one at a time and may stop part way.
    async fn remember_all(&self, conversation_id: &ConversationId, messages: Vec<Message>) -> Result<(), MemoryError> {
        for message in messages {
            self.remember(conversation_id, message).await?;
        }
        Ok(())
    }

    /// Return up to `limit` recent messages, oldest first.
    async fn recall(&self, conversation_id: &ConversationId, limit: usize) -> Result<Vec<Message>, MemoryError>;

    /// Drop a conversation entirely.
    async fn forget(&self, conversation_id: &ConversationId) -> Result<(), MemoryError>;

    /// List stored conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, MemoryError>;
}
