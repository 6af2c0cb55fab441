//! Client side of tool invocation: in-process first, remote fallback

mod cache;
mod invoker;
mod remote;

pub use cache::TtlCache;
pub use invoker::{InvokeError, ToolInvoker};
pub use remote::{HttpToolClient, RemoteToolClient};
