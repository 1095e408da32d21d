//! The agent loop — the heart of agentloom.
//!
//! The orchestrator follows a **moderate → recall → call → act** cycle:
//!
//! 1. **Validate** the user message through the security gate
//! 2. **Recall** recent history (and its summary) from conversation memory
//! 3. **Send to the model** with the assembled system prompt and visible tools
//! 4. **If tool calls**: vet each call, execute them in order, append results, loop back to step 3
//! 5. **If text response**: sanitize it, remember the exchange, return it
//!
//! The loop ends on a final answer, a security stop, the iteration limit,
//! or cancellation.

pub mod confirm;
pub mod orchestrator;
pub mod prompt;
pub mod stream_event;
pub mod summarizer;

pub use confirm::{AutoApprove, Confirmer};
pub use orchestrator::{
    AgentOrchestrator, ChatOptions, ChatResponse, EventCallback, FinishReason, ITERATION_LIMIT_MESSAGE,
};
pub use stream_event::StreamEvent;
pub use summarizer::ProviderSummarizer;
