//! History normalization for backends with strict turn rules.
//!
//! OpenAI-style APIs reject a request when an assistant message declares tool
//! calls that are not each answered by a `tool` message, or when a `tool`
//! message answers a call nobody made. Stored histories break these rules
//! routinely (a crash mid-turn, a trimmed recall window), so every outgoing
//! history passes through [`normalize_history`] first.

use std::collections::{HashMap, HashSet};

use agentloom_core::message::{Message, Role};
use tracing::debug;

/// Repair a history so that tool calls and tool responses pair up exactly.
///
/// - An assistant message keeps its `tool_calls` only if every call id has a
///   matching `tool` message somewhere in the history. Otherwise only its
///   text survives (and it is dropped entirely if the text is blank).
/// - Tool messages are emitted directly after the assistant message that
///   declared them, in call order. Tool messages tied to no retained
///   assistant message are dropped as orphans, as are duplicate responses.
pub fn normalize_history(history: &[Message]) -> Vec<Message> {
    // First response per call id wins.
    let mut responses: HashMap<&str, &Message> = HashMap::new();
    for msg in history.iter().filter(|m| m.role == Role::Tool) {
        if let Some(id) = msg.tool_call_id.as_deref() {
            responses.entry(id).or_insert(msg);
        }
    }

    let mut out = Vec::with_capacity(history.len());
    let mut answered: HashSet<&str> = HashSet::new();
    let mut dropped_calls = 0usize;
    let mut dropped_tools = 0usize;

    for msg in history {
        match msg.role {
            Role::Assistant if msg.has_tool_calls() => {
                let complete = msg.tool_calls.iter().all(|tc| {
                    responses.contains_key(tc.id.as_str()) && !answered.contains(tc.id.as_str())
                });

                if complete {
                    out.push(msg.clone());
                    for tc in &msg.tool_calls {
                        if let Some(response) = responses.get(tc.id.as_str()) {
                            out.push((*response).clone());
                            answered.insert(tc.id.as_str());
                        }
                    }
                } else {
                    dropped_calls += msg.tool_calls.len();
                    if !msg.content.trim().is_empty() {
                        let mut text_only = msg.clone();
                        text_only.tool_calls.clear();
                        out.push(text_only);
                    }
                }
            }
            // Emitted next to their assistant message above.
            Role::Tool => {
                let attached = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| answered.contains(id) && is_first_response(&responses, id, msg));
                if !attached {
                    dropped_tools += 1;
                }
            }
            _ => out.push(msg.clone()),
        }
    }

    if dropped_calls > 0 || dropped_tools > 0 {
        debug!(
            dropped_calls,
            dropped_tools,
            kept = out.len(),
            "Normalized conversation history"
        );
    }

    out
}

fn is_first_response(responses: &HashMap<&str, &Message>, id: &str, msg: &Message) -> bool {
    responses.get(id).is_some_and(|first| first.id == msg.id)
}
