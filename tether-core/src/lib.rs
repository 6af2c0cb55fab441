//! # Tether - reliable tool invocation for LLM agents
//!
//! Tether is the plumbing between an agent and the tools it calls:
//! - A tool registry that instruments every handler with call metrics
//! - A JSON-RPC dispatcher serving tools, resources and prompts
//! - A client-side invoker with retry and a remote fallback
//! - Retry with classified backoff, circuit breakers and adaptive timeouts
//!   for upstream LLM calls
//! - A sliding-window error monitor and a background task tracker
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let runtime = Runtime::from_config(&TetherConfig::load()?)?;
//!
//!     runtime.registry().register(
//!         ToolDefinition::new("echo")
//!             .with_description("Echo the text back")
//!             .with_schema(json!({
//!                 "type": "object",
//!                 "properties": {"text": {"type": "string"}},
//!                 "required": ["text"]
//!             })),
//!         sync_handler_fn(|args| Ok(args["text"].clone())),
//!     )?;
//!
//!     let reply = runtime.invoker().call("echo", json!({"text": "hi"})).await;
//!     println!("{:?}", reply);
//!
//!     runtime.dispatcher().run(&mut StdioTransport::stdio()).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod mcp;
pub mod monitoring;
pub mod resilience;
pub mod runtime;
pub mod tasks;
pub mod tools;

mod util;

pub use error::{Result, TetherError};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{HttpToolClient, InvokeError, RemoteToolClient, ToolInvoker};
    pub use crate::config::TetherConfig;
    pub use crate::error::{Result, TetherError};
    pub use crate::mcp::{
        Dispatcher, MemoryTransport, ProtocolError, ProtocolRequest, ProtocolResponse,
        PromptDescriptor, PromptGenerator, PromptTemplate, ResourceDescriptor, ResourceHandler,
        StaticResource, StdioTransport, Transport,
    };
    pub use crate::monitoring::{AlertSink, ErrorMonitor, WebhookAlertSink};
    pub use crate::resilience::{
        AdaptiveTimeout, CircuitBreaker, CircuitState, ErrorCategory, RetryPolicy, UpstreamGuard,
        UpstreamRegistry, classify, retry, retry_stream,
    };
    pub use crate::runtime::{Runtime, RuntimeStatus};
    pub use crate::tasks::{TaskStatus, TaskTracker};
    pub use crate::tools::{
        ToolDefinition, ToolError, ToolHandler, ToolRegistry, handler_fn, sync_handler_fn,
    };
}
