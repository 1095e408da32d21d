//! Conversation memory with pointer-based incremental summarization.
//!
//! Each conversation keeps every message verbatim plus a summary pointer: the
//! index of the last message folded into `summary_text`. When the span after
//! the pointer grows past `summarize_after`, everything except the newest
//! `recent_messages` is summarized and the pointer advances. Recall returns
//! the summary as a leading system message followed by the recent tail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agentloom_config::{MemoryBackendKind, MemoryConfig};
use agentloom_core::error::MemoryError;
use agentloom_core::memory::{ConversationSummary, MemoryBackend};
use agentloom_core::message::{Conversation, ConversationId, Message, Role};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::file_backend::FileStore;
use crate::noop::NoopMemory;
use crate::session::SessionStore;
use crate::store::ConversationStore;
use crate::summarizer::{ExtractiveSummarizer, Summarizer, cap_summary};

const TITLE_MAX_CHARS: usize = 60;

/// The [`MemoryBackend`] the orchestrator talks to.
pub struct ConversationMemory {
    store: Arc<dyn ConversationStore>,
    summarizer: Arc<dyn Summarizer>,
    config: MemoryConfig,
    /// Serializes load-modify-save per conversation id
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn ConversationStore>, config: MemoryConfig) -> Self {
        Self {
            store,
            summarizer: Arc::new(ExtractiveSummarizer),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Session-scoped memory with default settings.
    pub fn session() -> Self {
        Self::new(Arc::new(SessionStore::new()), MemoryConfig::default())
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The full stored record, including summary metadata.
    pub async fn conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, MemoryError> {
        self.store.load(id).await
    }

    fn lock_for(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Drop the map entry once no other caller holds or waits on it.
    fn release_lock(&self, id: &ConversationId, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }

    async fn append(&self, conversation_id: &ConversationId, messages: Vec<Message>) -> Result<(), MemoryError> {
        let mut conversation = self
            .store
            .load(conversation_id)
            .await?
            .unwrap_or_else(|| Conversation::new(conversation_id.clone()));

        for message in messages {
            self.maybe_summarize(&mut conversation).await;
            if conversation.metadata.title.is_none() && message.role == Role::User {
                conversation.metadata.title = derive_title(&message.content);
            }
            conversation.push(message);
        }

        self.store.save(&conversation).await
    }

    /// Advance the summary pointer if the unsummarized span is too long.
    async fn maybe_summarize(&self, conversation: &mut Conversation) {
        let unsummarized = conversation.unsummarized().len();
        if unsummarized <= self.config.summarize_after {
            return;
        }

        let len = conversation.messages.len();
        let Some(target) = len.checked_sub(self.config.recent_messages + 1) else {
            return;
        };
        let start = (conversation.metadata.summary_pointer + 1).max(0) as usize;
        if target < start {
            return;
        }

        let span = &conversation.messages[start..=target];
        let previous = conversation.metadata.summary_text.as_deref();
        match self
            .summarizer
            .summarize(previous, span, self.config.summary_max_chars)
            .await
        {
            Ok(text) => {
                let text = cap_summary(text.trim(), self.config.summary_max_chars);
                debug!(
                    conversation_id = %conversation.id,
                    from = start,
                    to = target,
                    chars = text.chars().count(),
                    "Summarized conversation history"
                );
                conversation.metadata.summary_text = Some(text);
                conversation.metadata.summary_pointer = target as i64;
            }
            Err(e) => {
                // History stays verbatim; the next remember retries
                warn!(conversation_id = %conversation.id, error = %e, "Summarization failed");
            }
        }
    }
}

/// First user message, whitespace-collapsed and cut to 60 characters.
fn derive_title(content: &str) -> Option<String> {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }
    let mut title: String = collapsed.chars().take(TITLE_MAX_CHARS - 3).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    Some(title)
}

#[async_trait]
impl MemoryBackend for ConversationMemory {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn remember(&self, conversation_id: &ConversationId, message: Message) -> Result<(), MemoryError> {
        self.remember_all(conversation_id, vec![message]).await
    }

    async fn remember_all(&self, conversation_id: &ConversationId, messages: Vec<Message>) -> Result<(), MemoryError> {
        let lock = self.lock_for(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.append(conversation_id, messages).await
        };
        self.release_lock(conversation_id, lock);
        result
    }

    async fn recall(&self, conversation_id: &ConversationId, limit: usize) -> Result<Vec<Message>, MemoryError> {
        let Some(conversation) = self.store.load(conversation_id).await? else {
            return Ok(Vec::new());
        };

        let limit = limit.min(self.config.recall_limit);
        let tail = conversation.unsummarized();
        let mut tail = &tail[tail.len().saturating_sub(limit)..];

        // A window must not open on a tool result whose call was cut off
        while let Some(first) = tail.first()
            && first.role == Role::Tool
        {
            tail = &tail[1..];
        }

        let mut messages = Vec::with_capacity(tail.len() + 1);
        if let Some(summary) = conversation.metadata.summary_text.as_deref()
            && !summary.is_empty()
        {
            messages.push(Message::system(format!("Summary of the earlier conversation:\n{summary}")));
        }
        messages.extend_from_slice(tail);
        Ok(messages)
    }

    async fn forget(&self, conversation_id: &ConversationId) -> Result<(), MemoryError> {
        let lock = self.lock_for(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(conversation_id).await
        };
        self.release_lock(conversation_id, lock);
        result.map(|_| ())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, MemoryError> {
        let mut list = self.store.list().await?;
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }
}

/// Build the configured memory backend with the extractive summarizer.
pub fn from_config(config: &MemoryConfig) -> Arc<dyn MemoryBackend> {
    from_config_with(config, Arc::new(ExtractiveSummarizer))
}

/// Build the configured memory backend around `summarizer`.
pub fn from_config_with(config: &MemoryConfig, summarizer: Arc<dyn Summarizer>) -> Arc<dyn MemoryBackend> {
    let store: Arc<dyn ConversationStore> = match config.backend {
        MemoryBackendKind::Session => Arc::new(SessionStore::new()),
        MemoryBackendKind::File => {
            let dir = config.path.clone().unwrap_or_else(FileStore::default_dir);
            Arc::new(FileStore::new(dir))
        }
        MemoryBackendKind::None => return Arc::new(NoopMemory),
    };
    Arc::new(ConversationMemory::new(store, config.clone()).with_summarizer(summarizer))
}
