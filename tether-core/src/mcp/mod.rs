//! Model Context Protocol surface
//!
//! A JSON-RPC dispatcher exposing registered tools, resources and prompts,
//! plus the transports it can be served over.

mod dispatcher;
mod prompts;
mod protocol;
mod resources;
mod transport;

pub use dispatcher::{Dispatcher, DispatcherStatus, Manifest};
pub use prompts::{PromptGenerator, PromptTemplate};
pub use protocol::*;
pub use resources::{FnResource, ResourceHandler, StaticResource, resource_fn};
pub use transport::{LineTransport, MemoryTransport, StdioTransport, Transport};
