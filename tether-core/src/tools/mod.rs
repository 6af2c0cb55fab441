//! Tool registry and handler abstractions
//!
//! A tool is a named, schema-described capability invoked with a JSON
//! argument object. Handlers implement [`ToolHandler`]; the
//! [`ToolRegistry`] wraps every handler in an instrumentation layer that
//! records per-tool [`ToolMetrics`].

mod error;
mod handler;
mod metrics;
mod registry;
mod schema;

pub use error::{ToolError, ToolErrorKind};
pub use handler::{FnHandler, SyncFnHandler, ToolHandler, handler_fn, sync_handler_fn};
pub use metrics::{ToolMetrics, ToolMetricsSnapshot};
pub use registry::{
    RegistrationPolicy, RegistryError, ToolDefinition, ToolMetadata, ToolRegistry,
};
pub use schema::{ToolDescriptor, anthropic_declaration, gemini_declaration};
