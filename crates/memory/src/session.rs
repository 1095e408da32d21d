//! In-process store — useful for testing and session-scoped conversations.

use std::collections::HashMap;
use std::sync::Arc;

use agentloom_core::error::MemoryError;
use agentloom_core::memory::ConversationSummary;
use agentloom_core::message::{Conversation, ConversationId};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{ConversationStore, summary_of};

/// Conversations kept in a map for as long as the store lives.
#[derive(Clone, Default)]
pub struct SessionStore {
    conversations: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for SessionStore {
    fn name(&self) -> &str {
        "session"
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>, MemoryError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), MemoryError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, MemoryError> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, MemoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.values().map(summary_of).collect())
    }
}
