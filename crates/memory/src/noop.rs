//! No-op memory backend — disables conversation memory entirely.

use agentloom_core::error::MemoryError;
use agentloom_core::memory::{ConversationSummary, MemoryBackend};
use agentloom_core::message::{ConversationId, Message};
use async_trait::async_trait;

/// Remembers nothing; every recall is empty.
pub struct NoopMemory;

#[async_trait]
impl MemoryBackend for NoopMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn remember(&self, _conversation_id: &ConversationId, _message: Message) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn recall(&self, _conversation_id: &ConversationId, _limit: usize) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }

    async fn forget(&self, _conversation_id: &ConversationId) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, MemoryError> {
        Ok(Vec::new())
    }
}
