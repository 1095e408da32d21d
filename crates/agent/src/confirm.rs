//! Confirmation collaborator for destructive tool calls.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Decides whether a destructive tool call may proceed.
///
/// Without a confirmer, the orchestrator ends the turn and hands the
/// confirmation prompt back to the caller.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, tool: &str, arguments: &Map<String, Value>, prompt: &str) -> bool;
}

/// Approves everything. For trusted automation only.
pub struct AutoApprove;

#[async_trait]
impl Confirmer for AutoApprove {
    async fn confirm(&self, _tool: &str, _arguments: &Map<String, Value>, _prompt: &str) -> bool {
        true
    }
}
