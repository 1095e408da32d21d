//! Model-backed summarizer for conversation memory.

use std::sync::Arc;

use agentloom_core::error::MemoryError;
use agentloom_core::message::Message;
use agentloom_core::provider::{PromptOptions, PromptRequest, Provider};
use agentloom_memory::{Summarizer, transcript};
use async_trait::async_trait;
use tracing::debug;

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Be extremely concise.";

/// Asks the configured backend to fold older messages into the running summary.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        messages: &[Message],
        max_chars: usize,
    ) -> Result<String, MemoryError> {
        let mut prompt = format!(
            "Summarize this conversation concisely. Preserve: topics discussed, decisions made, \
             important data/values mentioned, user preferences expressed, pending tasks.\n\
             Stay under {max_chars} characters.\n\n"
        );
        if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
            prompt.push_str(&format!("Summary so far:\n{previous}\n\nNew messages:\n"));
        }
        prompt.push_str(&transcript(messages));

        let request = PromptRequest::new(Message::user(prompt)).with_options(PromptOptions {
            system_prompt: Some(SUMMARIZER_SYSTEM_PROMPT.into()),
            temperature: Some(0.2),
            max_tokens: None,
        });

        let response = self
            .provider
            .prompt(request)
            .await
            .map_err(|e| MemoryError::Storage(format!("Summarization call failed: {e}")))?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(MemoryError::Storage("Empty response from summarization call".into()));
        }
        debug!(chars = text.chars().count(), "Model summary received");
        Ok(text.to_string())
    }
}
