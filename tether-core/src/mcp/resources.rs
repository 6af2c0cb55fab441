//! Resource handlers
//!
//! Resources are read-only data sources addressed by URI.

use super::protocol::ResourceContent;
use crate::tools::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Produces the current content of one resource
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: &str) -> Result<ResourceContent, ToolError>;
}

/// Fixed text content
#[derive(Debug, Clone)]
pub struct StaticResource {
    mime_type: String,
    text: String,
}

impl StaticResource {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mime_type: "text/plain".to_string(),
            text: text.into(),
        }
    }

    /// JSON content, serialized once
    pub fn json(value: &Value) -> Self {
        Self {
            mime_type: "application/json".to_string(),
            text: value.to_string(),
        }
    }
}

#[async_trait]
impl ResourceHandler for StaticResource {
    async fn read(&self, uri: &str) -> Result<ResourceContent, ToolError> {
        Ok(ResourceContent {
            uri: uri.to_string(),
            mime_type: Some(self.mime_type.clone()),
            text: self.text.clone(),
        })
    }
}

/// Adapter for async closures returning JSON
pub struct FnResource<F>(F);

#[async_trait]
impl<F, Fut> ResourceHandler for FnResource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn read(&self, uri: &str) -> Result<ResourceContent, ToolError> {
        let value = (self.0)().await?;
        let text = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(ResourceContent {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text,
        })
    }
}

/// Wrap an async closure as a resource handler
pub fn resource_fn<F, Fut>(f: F) -> Arc<dyn ResourceHandler>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnResource(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_resources() {
        let text = StaticResource::text("hello").read("tether://greeting").await.unwrap();
        assert_eq!(text.text, "hello");
        assert_eq!(text.mime_type.as_deref(), Some("text/plain"));

        let doc = StaticResource::json(&json!({"k": 1})).read("tether://doc").await.unwrap();
        assert_eq!(doc.uri, "tether://doc");
        assert_eq!(doc.text, "{\"k\":1}");
    }

    #[tokio::test]
    async fn test_fn_resource() {
        let handler = resource_fn(|| async { Ok(json!({"tools": 3})) });
        let content = handler.read("tether://stats").await.unwrap();
        assert_eq!(content.text, "{\"tools\":3}");
    }
}
