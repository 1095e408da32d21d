//! Tool catalog and invocation pipeline for agentloom.
//!
//! Tools are registered explicitly with [`ToolBuilder`] (or as a
//! [`ToolDefinition`] with a hand-written JSON Schema), collected in a
//! [`ToolCatalog`], and executed through a [`ToolInvoker`] that normalizes,
//! validates, authorizes, runs, and reduces every call.

pub mod catalog;
pub mod handler;
pub mod invoker;
pub mod normalize;
pub mod schema;

pub use catalog::{ToolBuilder, ToolCatalog, ToolDefinition};
pub use handler::{FnHandler, handler_fn};
pub use invoker::ToolInvoker;
pub use schema::{ParamSpec, ParamType};
