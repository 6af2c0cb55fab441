//! The async tool handler interface and closure adapters

use super::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A callable tool: JSON arguments in, JSON result out.
///
/// Synchronous tools are adapted with [`sync_handler_fn`], which resolves
/// immediately, so callers only ever see this one async interface.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Adapter for async closures
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.0)(args).await
    }
}

/// Adapter for blocking closures that return immediately
pub struct SyncFnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for SyncFnHandler<F>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.0)(args)
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap a synchronous closure as a handler
pub fn sync_handler_fn<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
{
    Arc::new(SyncFnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_async_and_sync_handlers_share_interface() {
        let async_handler = handler_fn(|args| async move { Ok(json!({"echo": args})) });
        let sync_handler = sync_handler_fn(|args| Ok(json!({"echo": args})));

        for handler in [async_handler, sync_handler] {
            let out = handler.call(json!({"text": "hi"})).await.unwrap();
            assert_eq!(out["echo"]["text"], "hi");
        }
    }
}
