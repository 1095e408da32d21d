//! LLM backend adapters for agentloom.
//!
//! All providers implement the `agentloom_core::Provider` trait. Retry/backoff
//! and history normalization live here so the orchestrator never sees a raw
//! HTTP failure or a malformed tool-call history.

pub mod history;
pub mod openai_compat;
pub mod retry;

pub use history::normalize_history;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, SendOutcome, send_with_retry};
