//! Remote tool server access
//!
//! The fallback path used by the invoker when a tool cannot be run in
//! process.

use crate::error::{Result, TetherError};
use async_trait::async_trait;
use serde_json::{Value, json};

/// A tool server reachable outside this process
#[async_trait]
pub trait RemoteToolClient: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}

/// JSON-over-HTTP client posting to `{base_url}/mcp/execute`
#[derive(Debug, Clone)]
pub struct HttpToolClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteToolClient for HttpToolClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let url = format!("{}/mcp/execute", self.base_url);
        let body = json!({
            "id": 1,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments},
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TetherError::Remote(format!("Failed to reach tool server: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TetherError::Remote(format!("HTTP {}: {}", status, text)));
        }

        let mut data: Value = response
            .json()
            .await
            .map_err(|e| TetherError::Remote(format!("Failed to parse tool server response: {}", e)))?;

        if let Some(error) = data.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(TetherError::Remote(message));
        }

        tracing::debug!(tool = %name, "remote tool call succeeded");
        Ok(data.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }
}
