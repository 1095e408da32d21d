//! Conversation store trait — where whole conversation records live.

use agentloom_core::error::MemoryError;
use agentloom_core::memory::ConversationSummary;
use agentloom_core::message::{Conversation, ConversationId};
use async_trait::async_trait;

/// A key-value store of [`Conversation`] records keyed by id.
///
/// [`ConversationMemory`](crate::ConversationMemory) owns the summarization
/// logic; stores only persist what they are given.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>, MemoryError>;

    async fn save(&self, conversation: &Conversation) -> Result<(), MemoryError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &ConversationId) -> Result<bool, MemoryError>;

    async fn list(&self) -> Result<Vec<ConversationSummary>, MemoryError>;
}

pub(crate) fn summary_of(conversation: &Conversation) -> ConversationSummary {
    ConversationSummary {
        id: conversation.id.clone(),
        title: conversation.metadata.title.clone(),
        updated_at: conversation.metadata.updated_at,
    }
}
