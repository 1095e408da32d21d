//! Closure adapter for [`ToolHandler`].

use std::future::Future;
use std::sync::Arc;

use agentloom_core::error::ToolError;
use agentloom_core::tool::{ToolContext, ToolHandler, ToolOutput};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A [`ToolHandler`] backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    async fn call(
        &self,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        (self.f)(arguments, context.clone()).await
    }
}

/// Wrap an async closure as a shareable tool handler.
///
/// ```ignore
/// let handler = handler_fn(|args, _ctx| async move {
///     let city = args["city"].as_str().unwrap_or_default().to_string();
///     Ok(ToolOutput::text(format!("Sunny in {city}")))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Map<String, Value>, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
