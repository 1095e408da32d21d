//! Tool invocation pipeline.
//!
//! Every call runs the same steps, in order:
//! 1. lookup (respecting agent scoping)
//! 2. argument key normalization
//! 3. schema validation and coercion
//! 4. single-item array unwrap
//! 5. permission check through the [`Authorizer`]
//! 6. handler execution with an "inside tool call" context
//! 7. reduction of the handler output to plain data
//! 8. lifecycle events
//!
//! Batches run strictly sequentially; a failing call becomes a failed
//! [`ToolResult`] and never aborts its siblings.

use std::sync::Arc;
use std::time::Instant;

use agentloom_core::auth::{AllowAll, Authorizer};
use agentloom_core::error::ToolError;
use agentloom_core::event::{EventSink, ToolEvent};
use agentloom_core::message::ToolCall;
use agentloom_core::tool::{ToolContext, ToolResult, Transformable};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::catalog::{ToolCatalog, ToolDefinition};
use crate::normalize::{normalize_keys, unwrap_single_item_arrays};
use crate::schema::validate;

/// Executes tool calls against a [`ToolCatalog`].
pub struct ToolInvoker {
    catalog: Arc<ToolCatalog>,
    authorizer: Arc<dyn Authorizer>,
    events: Option<Arc<dyn EventSink>>,
}

impl ToolInvoker {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self {
            catalog,
            authorizer: Arc::new(AllowAll),
            events: None,
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Run one tool and return its plain-data result.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .catalog
            .find_for_agent(name, context.agent_name.as_deref())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let raw_arguments = Value::Object(arguments.clone());
        match self.run(&tool, arguments, context).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "Tool call failed");
                self.emit(ToolEvent::ToolFailed {
                    tool: tool.name.clone(),
                    arguments: raw_arguments,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        tool: &ToolDefinition,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let arguments = normalize_keys(arguments, &tool.schema);
        let arguments = validate(&tool.schema, arguments).map_err(|errors| ToolError::Validation {
            tool: tool.name.clone(),
            errors,
        })?;
        let arguments = unwrap_single_item_arrays(arguments, &tool.schema);

        if let Some(permission) = tool.permission.as_deref()
            && !self.authorizer.can_perform(permission, context).await
        {
            return Err(ToolError::ExecutionDenied {
                tool: tool.name.clone(),
                permission: permission.to_string(),
            });
        }

        let arguments_value = Value::Object(arguments.clone());
        self.emit(ToolEvent::ToolCalled {
            tool: tool.name.clone(),
            arguments: arguments_value.clone(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let inner_context = context.entering_tool_call();
        let output = tool.handler.call(arguments, &inner_context).await?;
        let result = output.to_plain();
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(tool = %tool.name, duration_ms, "Tool executed");
        self.emit(ToolEvent::ToolExecuted {
            tool: tool.name.clone(),
            arguments: arguments_value,
            result: result.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(result)
    }

    /// Run a batch in order, one call at a time.
    pub async fn execute_many(&self, calls: &[ToolCall], context: &ToolContext) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_call(call, context).await);
        }
        results
    }

    /// Run one model-issued call, folding any error into a failed result.
    pub async fn execute_call(&self, call: &ToolCall, context: &ToolContext) -> ToolResult {
        match self.execute(&call.name, call.arguments.clone(), context).await {
            Ok(value) => ToolResult::ok(&call.id, &call.name, value),
            Err(e) => ToolResult::failed(&call.id, &call.name, e.to_string()),
        }
    }

    fn emit(&self, event: ToolEvent) {
        if let Some(sink) = &self.events {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolBuilder;
    use crate::handler::handler_fn;
    use crate::schema::ParamType;
    use agentloom_core::tool::ToolOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ToolEvent>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: ToolEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct DenyAll;

    #[async_trait]
    impl Authorizer for DenyAll {
        async fn can_perform(&self, _permission: &str, _context: &ToolContext) -> bool {
            false
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register(
            ToolBuilder::new("getOrder", "Look up an order")
                .param("orderId", ParamType::Integer, "Order number")
                .required()
                .build(handler_fn(|args, _ctx| async move {
                    Ok(ToolOutput::Json {
                        status: 200,
                        body: json!({ "id": args["orderId"], "status": "open" }),
                    })
                })),
        );
        catalog.register(
            ToolBuilder::new("getWeather", "Current weather")
                .param("city", ParamType::String, "City")
                .required()
                .build(handler_fn(|args, _ctx| async move {
                    let city = args["city"].as_str().unwrap_or_default().to_string();
                    Ok(ToolOutput::text(format!("Sunny in {city}")))
                })),
        );
        catalog.register(
            ToolBuilder::new("explode", "Always fails")
                .build(handler_fn(|_args, _ctx| async { Err(ToolError::failed("explode", "kaboom")) })),
        );
        catalog.register(
            ToolBuilder::new("refundOrder", "Refund an order")
                .param("orderId", ParamType::Integer, "Order number")
                .required()
                .permission("orders.refund")
                .build(handler_fn(|_args, _ctx| async {
                    Ok(ToolOutput::Redirect {
                        location: "/orders".into(),
                        flash: Some("Refund issued".into()),
                    })
                })),
        );
        catalog
    }

    fn invoker() -> ToolInvoker {
        ToolInvoker::new(Arc::new(catalog()))
    }

    #[tokio::test]
    async fn coerces_arguments_and_reduces_output() {
        let result = invoker()
            .execute("getOrder", args(json!({ "orderId": "5" })), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result, json!({ "id": 5, "status": "open" }));
    }

    #[tokio::test]
    async fn snake_case_arguments_validate() {
        let result = invoker()
            .execute("getOrder", args(json!({ "order_id": 8 })), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result["id"], json!(8));
    }

    #[tokio::test]
    async fn validation_error_names_field() {
        let err = invoker()
            .execute("getOrder", Map::new(), &ToolContext::default())
            .await
            .unwrap_err();
        match err {
            ToolError::Validation { tool, errors } => {
                assert_eq!(tool, "getOrder");
                assert_eq!(errors[0].field, "orderId");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool() {
        let err = invoker()
            .execute("nope", Map::new(), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn permission_denied_skips_handler() {
        let invoker = invoker().with_authorizer(Arc::new(DenyAll));
        let err = invoker
            .execute("refundOrder", args(json!({ "orderId": 1 })), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionDenied { ref permission, .. } if permission == "orders.refund"));
    }

    #[tokio::test]
    async fn redirect_reduces_to_flash_message() {
        let result = invoker()
            .execute("refundOrder", args(json!({ "orderId": 1 })), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result, json!("Refund issued"));
    }

    #[tokio::test]
    async fn handler_sees_tool_call_context() {
        let seen = Arc::new(AtomicBool::new(false));
        let flag = seen.clone();
        let mut catalog = ToolCatalog::new();
        catalog.register(ToolBuilder::new("probe", "Probe").build(handler_fn(move |_args, ctx| {
            let flag = flag.clone();
            async move {
                flag.store(ctx.in_tool_call, Ordering::SeqCst);
                Ok(ToolOutput::text("done"))
            }
        })));

        let context = ToolContext::for_agent("support");
        ToolInvoker::new(Arc::new(catalog))
            .execute("probe", Map::new(), &context)
            .await
            .unwrap();
        assert!(seen.load(Ordering::SeqCst));
        // The caller's context is untouched
        assert!(!context.in_tool_call);
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let calls = vec![
            ToolCall::new("a", "getWeather", args(json!({ "city": "Riyadh" }))),
            ToolCall::new("b", "explode", Map::new()),
            ToolCall::new("c", "getOrder", args(json!({ "orderId": 3 }))),
        ];
        let results = invoker().execute_many(&calls, &ToolContext::default()).await;

        assert_eq!(results.len(), 3);
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("kaboom"));
        assert!(results[2].success);
        assert_eq!(results[0].result, Some(json!("Sunny in Riyadh")));
    }

    #[tokio::test]
    async fn lifecycle_events() {
        let sink = Arc::new(RecordingSink::default());
        let invoker = invoker().with_events(sink.clone());

        invoker
            .execute("getWeather", args(json!({ "city": "Jeddah" })), &ToolContext::default())
            .await
            .unwrap();
        invoker
            .execute("explode", Map::new(), &ToolContext::default())
            .await
            .unwrap_err();

        assert_eq!(
            sink.names(),
            ["tool_called", "tool_executed", "tool_called", "tool_failed"]
        );
    }

    #[tokio::test]
    async fn scoped_tools_resolve_per_agent() {
        let mut catalog = ToolCatalog::new();
        catalog.register(
            ToolBuilder::new("lookup", "Public")
                .build(handler_fn(|_a, _c| async { Ok(ToolOutput::text("public")) })),
        );
        catalog.register(
            ToolBuilder::new("lookup", "Internal")
                .allowed_agents(["ops"])
                .build(handler_fn(|_a, _c| async { Ok(ToolOutput::text("internal")) })),
        );
        let invoker = ToolInvoker::new(Arc::new(catalog));

        let ops = invoker
            .execute("lookup", Map::new(), &ToolContext::for_agent("ops"))
            .await
            .unwrap();
        assert_eq!(ops, json!("internal"));

        let err = invoker
            .execute("lookup", Map::new(), &ToolContext::for_agent("support"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
