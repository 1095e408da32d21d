//! Tool catalog — the static table of registered tools.
//!
//! Tools are registered explicitly (usually through [`ToolBuilder`]) before
//! the catalog is shared; afterwards it is read-only and cheap to clone
//! behind an `Arc`.
//!
//! A name may be registered more than once: an unscoped variant visible to
//! every agent, and scoped variants restricted to named agents. As soon as
//! any scoped variant of a name exists, the unscoped one is hidden, so a
//! caller cannot bypass scoping by invoking the bare name.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use agentloom_core::provider::ToolSpec;
use agentloom_core::tool::ToolHandler;
use serde_json::Value;
use tracing::debug;

use crate::schema::{ParamSpec, ParamType, build_schema};

/// A registered tool: schema, metadata and handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub schema: Value,
    pub handler: Arc<dyn ToolHandler>,
    pub requires_confirmation: bool,
    /// Permission the caller must hold, checked through the authorizer
    pub permission: Option<String>,
    /// `None` = visible to every agent
    pub allowed_agents: Option<HashSet<String>>,
}

impl ToolDefinition {
    /// Register a tool from a hand-written JSON Schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler,
            requires_confirmation: false,
            permission: None,
            allowed_agents: None,
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.allowed_agents.is_some()
    }

    fn allows(&self, agent: Option<&str>) -> bool {
        match (&self.allowed_agents, agent) {
            (None, _) => true,
            (Some(agents), Some(agent)) => agents.contains(agent),
            (Some(_), None) => false,
        }
    }

    /// The provider-facing description of this tool.
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation)
            .field("permission", &self.permission)
            .field("allowed_agents", &self.allowed_agents)
            .finish_non_exhaustive()
    }
}

/// Registry of tool definitions, in registration order.
#[derive(Default, Clone)]
pub struct ToolCatalog {
    tools: Vec<Arc<ToolDefinition>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) {
        debug!(
            tool = %definition.name,
            scoped = definition.is_scoped(),
            "Registered tool"
        );
        self.tools.push(Arc::new(definition));
    }

    pub fn register_all(&mut self, definitions: impl IntoIterator<Item = ToolDefinition>) {
        for definition in definitions {
            self.register(definition);
        }
    }

    /// First registered variant of `name`, regardless of scoping.
    pub fn find(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    /// The variant of `name` the given agent is allowed to call.
    pub fn find_for_agent(&self, name: &str, agent: Option<&str>) -> Option<Arc<ToolDefinition>> {
        let scoped = self.scoped_names();
        self.tools
            .iter()
            .filter(|t| t.name == name)
            .find(|t| Self::visible(t, agent, &scoped))
            .cloned()
    }

    /// Every definition grouped by name.
    pub fn all(&self) -> BTreeMap<String, Vec<Arc<ToolDefinition>>> {
        let mut map: BTreeMap<String, Vec<Arc<ToolDefinition>>> = BTreeMap::new();
        for tool in &self.tools {
            map.entry(tool.name.clone()).or_default().push(tool.clone());
        }
        map
    }

    /// Definitions visible to `agent`, in registration order.
    pub fn filter_for_agent(&self, agent: Option<&str>) -> Vec<Arc<ToolDefinition>> {
        let scoped = self.scoped_names();
        self.tools
            .iter()
            .filter(|t| Self::visible(t, agent, &scoped))
            .cloned()
            .collect()
    }

    /// Provider-facing specs for the tools `agent` may call.
    pub fn definitions_for_agent(&self, agent: Option<&str>) -> Vec<ToolSpec> {
        self.filter_for_agent(agent).iter().map(|t| t.to_spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn scoped_names(&self) -> HashSet<&str> {
        self.tools
            .iter()
            .filter(|t| t.is_scoped())
            .map(|t| t.name.as_str())
            .collect()
    }

    fn visible(tool: &ToolDefinition, agent: Option<&str>, scoped: &HashSet<&str>) -> bool {
        if tool.is_scoped() {
            tool.allows(agent)
        } else {
            !scoped.contains(tool.name.as_str())
        }
    }
}

/// Fluent builder for explicit tool registration.
///
/// Parameter modifiers (`required`, `enum_values`, `default`, ...) apply to
/// the most recently declared parameter.
pub struct ToolBuilder {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    requires_confirmation: bool,
    permission: Option<String>,
    allowed_agents: Option<HashSet<String>>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            requires_confirmation: false,
            permission: None,
            allowed_agents: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        self.params.push(ParamSpec::new(name, kind, description));
        self
    }

    pub fn required(self) -> Self {
        self.with_last(|p| p.required = true)
    }

    pub fn enum_values<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.with_last(move |p| p.enum_values = values)
    }

    pub fn default(self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.with_last(move |p| p.default = Some(value))
    }

    pub fn pattern(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.with_last(move |p| p.pattern = Some(pattern))
    }

    pub fn min_length(self, min: u64) -> Self {
        self.with_last(|p| p.min_length = Some(min))
    }

    pub fn max_length(self, max: u64) -> Self {
        self.with_last(|p| p.max_length = Some(max))
    }

    /// Element type for an `array` parameter.
    pub fn items(self, kind: ParamType) -> Self {
        self.with_last(|p| p.items = Some(kind))
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn allowed_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    /// The generated JSON Schema, without consuming the builder.
    pub fn schema(&self) -> Value {
        build_schema(&self.params)
    }

    pub fn build(self, handler: Arc<dyn ToolHandler>) -> ToolDefinition {
        ToolDefinition {
            schema: build_schema(&self.params),
            name: self.name,
            description: self.description,
            handler,
            requires_confirmation: self.requires_confirmation,
            permission: self.permission,
            allowed_agents: self.allowed_agents,
        }
    }

    fn with_last(mut self, f: impl FnOnce(&mut ParamSpec)) -> Self {
        match self.params.last_mut() {
            Some(param) => f(param),
            None => debug!(tool = %self.name, "Parameter modifier with no parameter declared; ignored"),
        }
        self
    }
}
