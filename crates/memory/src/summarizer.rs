//! Summarizers — condense older conversation history into a running summary.

use agentloom_core::error::MemoryError;
use agentloom_core::message::{Message, Role};
use async_trait::async_trait;

/// Characters kept per message when building a transcript.
const TRANSCRIPT_MESSAGE_CHARS: usize = 500;

/// Turns a span of messages into summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Fold `messages` into `previous` (the summary so far, if any). The
    /// result should stay within `max_chars`; callers cap it regardless.
    async fn summarize(
        &self,
        previous: Option<&str>,
        messages: &[Message],
        max_chars: usize,
    ) -> Result<String, MemoryError>;
}

/// `role: content` lines with long messages cut short. Tool calls are listed
/// by name so the summary can mention what was looked up.
pub fn transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let content = message.content.trim();
        let content = truncate_chars(content, TRANSCRIPT_MESSAGE_CHARS);
        if !content.is_empty() {
            out.push_str(&format!("{}: {content}\n", message.role.as_str()));
        }
        if !message.tool_calls.is_empty() {
            let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
            out.push_str(&format!("{}: [called {}]\n", message.role.as_str(), names.join(", ")));
        }
    }
    out
}

/// Keep at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}

/// Keep the newest `max_chars` characters of a growing summary.
pub fn cap_summary(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars.saturating_sub(1);
    let mut out = String::from("…");
    out.extend(text.chars().skip(skip));
    out
}

/// A deterministic summarizer that needs no model: the first sentence of each
/// user and assistant message, appended to the previous summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    fn first_sentence(text: &str) -> &str {
        let text = text.trim();
        let sentence = match text.find(['.', '?', '!', '\n']) {
            Some(end) => &text[..=end],
            None => text,
        };
        sentence.trim()
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        messages: &[Message],
        max_chars: usize,
    ) -> Result<String, MemoryError> {
        let mut lines: Vec<String> = previous
            .filter(|p| !p.trim().is_empty())
            .map(|p| vec![p.trim().to_string()])
            .unwrap_or_default();

        for message in messages {
            let label = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System | Role::Tool => continue,
            };
            let sentence = Self::first_sentence(&message.content);
            if !sentence.is_empty() {
                lines.push(format!("{label}: {}", truncate_chars(sentence, 200)));
            }
        }

        Ok(cap_summary(&lines.join("\n"), max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloom_core::message::ToolCall;

    #[tokio::test]
    async fn extractive_keeps_first_sentences() {
        let messages = vec![
            Message::user("What's the weather in Riyadh? I'm flying tomorrow."),
            Message::assistant("It is sunny. Expect 35°C."),
            Message::tool_result("call_1", "{\"temp\":35}"),
        ];
        let summary = ExtractiveSummarizer.summarize(None, &messages, 2000).await.unwrap();
        assert_eq!(summary, "User: What's the weather in Riyadh?\nAssistant: It is sunny.");
    }

    #[tokio::test]
    async fn extractive_extends_previous_summary() {
        let summary = ExtractiveSummarizer
            .summarize(Some("User: Hi."), &[Message::user("Order 5 please")], 2000)
            .await
            .unwrap();
        assert_eq!(summary, "User: Hi.\nUser: Order 5 please");
    }

    #[tokio::test]
    async fn extractive_respects_cap() {
        let long = "word ".repeat(100);
        let messages: Vec<Message> = (0..20).map(|_| Message::user(long.clone())).collect();
        let summary = ExtractiveSummarizer.summarize(None, &messages, 300).await.unwrap();
        assert_eq!(summary.chars().count(), 300);
        assert!(summary.starts_with('…'));
    }

    #[test]
    fn transcript_lists_tool_calls() {
        let call = ToolCall::new("c1", "getWeather", serde_json::Map::new());
        let text = transcript(&[
            Message::user("weather?"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("c1", "Sunny"),
        ]);
        assert_eq!(text, "user: weather?\nassistant: [called getWeather]\ntool: Sunny\n");
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héll…");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(cap_summary("abcdef", 4), "…def");
    }
}
