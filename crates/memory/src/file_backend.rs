//! File-based store — one pretty-printed JSON document per conversation.
//!
//! Storage location: `~/.agentloom/conversations/<id>.json` unless a
//! directory is configured. Files are human-inspectable and survive restarts.

use std::path::{Path, PathBuf};

use agentloom_core::error::MemoryError;
use agentloom_core::memory::ConversationSummary;
use agentloom_core::message::{Conversation, ConversationId};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::store::{ConversationStore, summary_of};

/// A directory of JSON conversation files.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File conversation store opened");
        Self { dir }
    }

    /// Default directory: `~/.agentloom/conversations`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".agentloom").join("conversations")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids are opaque. `[A-Za-z0-9-]` is kept and every other byte,
    /// `_` included, becomes `_xx` hex, so distinct ids never share a file
    /// and no id can escape the directory.
    fn path_for(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(id.as_str())))
    }

    async fn read(path: &Path) -> Result<Option<Conversation>, MemoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| MemoryError::Serialization(format!("{}: {e}", path.display())))
    }
}

fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

#[async_trait]
impl ConversationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>, MemoryError> {
        Self::read(&self.path_for(id)).await
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to create conversation directory: {e}")))?;

        let json = serde_json::to_string_pretty(conversation)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written record
        let path = self.path_for(&conversation.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write conversation file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to replace conversation file: {e}")))?;
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, MemoryError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MemoryError::Storage(format!("Failed to delete conversation file: {e}"))),
        }
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, MemoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::Storage(format!("Failed to list conversations: {e}"))),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(conversation)) => summaries.push(summary_of(&conversation)),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupted conversation file"),
            }
        }
        Ok(summaries)
    }
}
