//! Tool execution types — handler contract, per-call context, and results.
//!
//! Handlers may return framework-flavoured outputs (a rendered view, a JSON
//! API response, a redirect). Everything is reduced to plain JSON through the
//! [`Transformable`] capability before it goes back to the model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::message::ConversationId;

/// Explicit per-call context handed down the call chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    /// Conversation this call belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    /// Name of the agent on whose behalf the tool runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// Caller identity, for the authorization collaborator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Set while a handler is executing, so nested code can tell it runs inside a tool call.
    #[serde(default)]
    pub in_tool_call: bool,
}

impl ToolContext {
    pub fn for_agent(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: Some(agent_name.into()),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// A copy of this context marked as executing inside a tool call.
    pub fn entering_tool_call(&self) -> Self {
        Self {
            in_tool_call: true,
            ..self.clone()
        }
    }
}

/// Anything that can reduce itself to plain data for the model.
pub trait Transformable: Send + Sync {
    fn to_plain(&self) -> serde_json::Value;
}

impl Transformable for serde_json::Value {
    fn to_plain(&self) -> serde_json::Value {
        self.clone()
    }
}

impl Transformable for String {
    fn to_plain(&self) -> serde_json::Value {
        serde_json::Value::String(self.clone())
    }
}

/// What a tool handler hands back.
pub enum ToolOutput {
    /// Plain data, returned as-is
    Value(serde_json::Value),
    /// A rendered view; only its bound variables matter to the model
    View {
        template: String,
        bindings: serde_json::Map<String, serde_json::Value>,
    },
    /// An API response; the JSON body is what matters
    Json {
        status: u16,
        body: serde_json::Value,
    },
    /// A redirect; the flashed message (if any) is what matters
    Redirect {
        location: String,
        flash: Option<String>,
    },
    /// A handler-defined type implementing [`Transformable`]
    Custom(Box<dyn Transformable>),
}

impl ToolOutput {
    /// Wrap any serializable value.
    pub fn data<T: Serialize>(value: &T) -> Result<Self, ToolError> {
        serde_json::to_value(value)
            .map(Self::Value)
            .map_err(|e| ToolError::failed("<output>", format!("unserializable result: {e}")))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Value(serde_json::Value::String(text.into()))
    }

    pub fn custom(value: impl Transformable + 'static) -> Self {
        Self::Custom(Box::new(value))
    }
}

impl Transformable for ToolOutput {
    fn to_plain(&self) -> serde_json::Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::View { bindings, .. } => serde_json::Value::Object(bindings.clone()),
            Self::Json { body, .. } => body.clone(),
            Self::Redirect { location, flash } => match flash {
                Some(message) => serde_json::Value::String(message.clone()),
                None => serde_json::json!({ "redirect": location }),
            },
            Self::Custom(inner) => inner.to_plain(),
        }
    }
}

impl std::fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ToolOutput").field(&self.to_plain()).finish()
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

/// A callable tool implementation.
///
/// Receives arguments that have already been normalized and validated
/// against the tool's schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// The outcome of one tool call within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// Tool name
    pub name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Plain-data result when successful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error message when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(tool_call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Text sent back to the model in the tool-result message.
    pub fn to_content(&self) -> String {
        if self.success {
            match &self.result {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Invoice {
        number: u32,
    }

    impl Transformable for Invoice {
        fn to_plain(&self) -> serde_json::Value {
            serde_json::json!({ "invoice": self.number })
        }
    }

    #[test]
    fn view_reduces_to_bindings() {
        let mut bindings = serde_json::Map::new();
        bindings.insert("orders".into(), serde_json::json!([1, 2]));
        let out = ToolOutput::View {
            template: "orders.index".into(),
            bindings,
        };
        assert_eq!(out.to_plain(), serde_json::json!({ "orders": [1, 2] }));
    }

    #[test]
    fn json_response_reduces_to_body() {
        let out = ToolOutput::Json {
            status: 201,
            body: serde_json::json!({ "id": 7 }),
        };
        assert_eq!(out.to_plain(), serde_json::json!({ "id": 7 }));
    }

    #[test]
    fn redirect_prefers_flash_message() {
        let flashed = ToolOutput::Redirect {
            location: "/orders".into(),
            flash: Some("Order saved".into()),
        };
        assert_eq!(flashed.to_plain(), serde_json::json!("Order saved"));

        let bare = ToolOutput::Redirect {
            location: "/orders".into(),
            flash: None,
        };
        assert_eq!(bare.to_plain(), serde_json::json!({ "redirect": "/orders" }));
    }

    #[test]
    fn custom_transformable() {
        let out = ToolOutput::custom(Invoice { number: 12 });
        assert_eq!(out.to_plain(), serde_json::json!({ "invoice": 12 }));
    }

    #[test]
    fn result_content_rendering() {
        let ok = ToolResult::ok("c1", "getWeather", serde_json::json!("Sunny, 35°C"));
        assert_eq!(ok.to_content(), "Sunny, 35°C");

        let obj = ToolResult::ok("c2", "getOrder", serde_json::json!({ "id": 5 }));
        assert_eq!(obj.to_content(), r#"{"id":5}"#);

        let failed = ToolResult::failed("c3", "getOrder", "boom");
        assert_eq!(failed.to_content(), "Error: boom");
    }

    #[test]
    fn context_marks_tool_call() {
        let ctx = ToolContext::for_agent("support");
        assert!(!ctx.in_tool_call);
        let inner = ctx.entering_tool_call();
        assert!(inner.in_tool_call);
        assert_eq!(inner.agent_name.as_deref(), Some("support"));
    }
}
