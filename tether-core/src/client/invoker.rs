//! Client-side tool invocation
//!
//! [`ToolInvoker`] prefers the in-process registry, retrying transient
//! failures, and falls back once to a remote tool server. It also serves
//! the tool list projected for function-calling APIs, cached with a TTL.

use super::cache::TtlCache;
use super::remote::{HttpToolClient, RemoteToolClient};
use crate::config::{ClientSettings, TetherConfig, VisibilitySettings};
use crate::resilience::{RetryPolicy, retry_with_cancel_when};
use crate::tools::{
    ToolDescriptor, ToolError, ToolErrorKind, ToolRegistry, anthropic_declaration,
    gemini_declaration,
};
use crate::util::truncate;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a tool call produced no result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// The name is not registered, or the handler reported a missing
    /// resource; never retried
    #[error("Tool '{name}' not found: {message}")]
    NotFound { name: String, message: String },

    /// The handler rejected the arguments; never retried, never sent remote
    #[error("Invalid arguments for tool '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    /// In-process attempts and the remote fallback all failed
    #[error("Tool call failed after {attempts} attempts: {message}")]
    Failed { attempts: usize, message: String },

    /// The caller cancelled while retries were pending
    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

/// Tool list projection with the registry generation it was built from
#[derive(Debug)]
struct Projection {
    generation: u64,
    tools: Vec<Value>,
}

/// Which external schema shape to project into
#[derive(Debug, Clone, Copy)]
enum Flavor {
    Gemini,
    Anthropic,
}

pub struct ToolInvoker {
    registry: Option<Arc<ToolRegistry>>,
    remote: Option<Arc<dyn RemoteToolClient>>,
    policy: RetryPolicy,
    settings: ClientSettings,
    visibility: VisibilitySettings,
    gemini_cache: TtlCache<Projection>,
    anthropic_cache: TtlCache<Projection>,
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker")
            .field("in_process", &self.registry.is_some())
            .field("remote", &self.remote.is_some())
            .field("policy", &self.policy)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ToolInvoker {
    /// Invoker with no backends attached
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            registry: None,
            remote: None,
            policy: RetryPolicy::tool_calls(),
            gemini_cache: TtlCache::new(settings.cache_ttl),
            anthropic_cache: TtlCache::new(settings.cache_ttl),
            visibility: VisibilitySettings::default(),
            settings,
        }
    }

    /// In-process registry plus an HTTP fallback to `client.server_url`
    pub fn from_config(config: &TetherConfig, registry: Arc<ToolRegistry>) -> Self {
        Self::new(config.client.clone())
            .with_registry(registry)
            .with_remote(Arc::new(HttpToolClient::new(config.client.server_url.clone())))
            .with_policy(RetryPolicy::tool_calls_from_settings(&config.tool_retry))
            .with_visibility(config.visibility.clone())
    }

    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteToolClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_visibility(mut self, visibility: VisibilitySettings) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `name` with `args`. See [`call_with_cancel`](Self::call_with_cancel).
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, InvokeError> {
        self.call_with_cancel(name, args, &CancellationToken::new()).await
    }

    /// Call `name`, stopping retries as soon as `cancel` fires.
    ///
    /// Without a registry the remote server is the only path. Unknown names
    /// and caller errors (invalid arguments, missing resources, cancellation)
    /// fail immediately. Any other in-process failure, once retries are spent
    /// or the error is not retryable, gets one remote attempt.
    pub async fn call_with_cancel(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        let Some(registry) = &self.registry else {
            tracing::debug!(tool = %name, "no in-process registry, calling remote tool server");
            return self.call_remote(name, args).await.map_err(|message| InvokeError::Failed {
                attempts: 1,
                message,
            });
        };

        let handler = registry.get_handler(name).map_err(|e| {
            tracing::error!(tool = %name, "tool not found");
            InvokeError::NotFound {
                name: name.to_string(),
                message: e.to_string(),
            }
        })?;

        let mut attempts = 0usize;
        let policy = &self.policy;
        let retryable = |e: &ToolError| {
            !e.kind.is_caller_error() && (e.kind.is_retryable() || policy.is_retryable(&e.message))
        };
        let outcome = retry_with_cancel_when(policy, cancel, retryable, || {
            attempts += 1;
            let handler = Arc::clone(&handler);
            let args = args.clone();
            async move { handler.call(args).await }
        })
        .await;

        let error = match outcome {
            Ok(value) => {
                tracing::debug!(tool = %name, attempts, "tool call succeeded");
                return Ok(value);
            }
            Err(error) => error,
        };

        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled(error.message));
        }
        match error.kind {
            ToolErrorKind::InvalidArguments => {
                tracing::warn!(
                    tool = %name,
                    error = %truncate(&error.message, 200),
                    "tool rejected arguments"
                );
                return Err(InvokeError::InvalidArguments {
                    name: name.to_string(),
                    message: error.message,
                });
            }
            ToolErrorKind::NotFound => {
                return Err(InvokeError::NotFound {
                    name: name.to_string(),
                    message: error.message,
                });
            }
            ToolErrorKind::Cancelled => return Err(InvokeError::Cancelled(error.message)),
            _ => {}
        }

        tracing::error!(
            tool = %name,
            attempts,
            error = %truncate(&error.message, 200),
            "in-process tool call failed"
        );

        if self.remote.is_some() {
            tracing::warn!(tool = %name, "trying remote fallback");
            match self.call_remote(name, args).await {
                Ok(value) => return Ok(value),
                Err(message) => {
                    tracing::warn!(
                        tool = %name,
                        error = %truncate(&message, 200),
                        "remote fallback failed"
                    );
                }
            }
        }

        Err(InvokeError::Failed {
            attempts,
            message: error.message,
        })
    }

    async fn call_remote(&self, name: &str, args: Value) -> Result<Value, String> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| "No remote tool server configured".to_string())?;
        remote.call_tool(name, args).await.map_err(|e| e.to_string())
    }

    /// `{name, description}` for every listed tool
    pub fn list_tools(&self) -> Vec<Value> {
        self.tools_with_schemas()
            .into_iter()
            .map(|t| json!({"name": t.name, "description": t.description}))
            .collect()
    }

    /// Listed tools with their input schemas, in registration order
    pub fn tools_with_schemas(&self) -> Vec<ToolDescriptor> {
        match &self.registry {
            Some(registry) => registry.list_schemas(&self.visibility),
            None => Vec::new(),
        }
    }

    /// Core tools first, then the rest, each group in registration order
    fn prioritized(&self) -> Vec<ToolDescriptor> {
        let (mut core, rest): (Vec<_>, Vec<_>) = self
            .tools_with_schemas()
            .into_iter()
            .partition(|t| self.settings.core_tools.contains(&t.name));
        tracing::info!(
            total = core.len() + rest.len(),
            core = core.len(),
            "tool prioritization"
        );
        core.extend(rest);
        core
    }

    /// Declarations with upper-cased type names, at most `max_tools` of them
    pub fn gemini_tools(&self, force_refresh: bool, max_tools: Option<usize>) -> Vec<Value> {
        self.projected(Flavor::Gemini, force_refresh, max_tools)
    }

    /// Declarations with the schema passed through, at most `max_tools` of them
    pub fn anthropic_tools(&self, force_refresh: bool, max_tools: Option<usize>) -> Vec<Value> {
        self.projected(Flavor::Anthropic, force_refresh, max_tools)
    }

    fn projected(&self, flavor: Flavor, force_refresh: bool, max_tools: Option<usize>) -> Vec<Value> {
        let limit = max_tools.filter(|n| *n > 0).unwrap_or(self.settings.max_tools);
        let generation = self.registry.as_ref().map_or(0, |r| r.generation());
        let cache = match flavor {
            Flavor::Gemini => &self.gemini_cache,
            Flavor::Anthropic => &self.anthropic_cache,
        };

        if !force_refresh {
            if let Some(cached) = cache.get().filter(|p| p.generation == generation) {
                tracing::debug!(?flavor, "using cached tool declarations");
                return cached.tools.iter().take(limit).cloned().collect();
            }
        }

        let tools: Vec<Value> = self
            .prioritized()
            .iter()
            .map(|tool| match flavor {
                Flavor::Gemini => gemini_declaration(tool),
                Flavor::Anthropic => anthropic_declaration(tool),
            })
            .collect();
        tracing::info!(?flavor, tool_count = tools.len(), "tool declaration cache updated");

        let projection = cache.store(Projection { generation, tools });
        projection.tools.iter().take(limit).cloned().collect()
    }

    /// Drop both projection caches
    pub fn invalidate_caches(&self) {
        self.gemini_cache.invalidate();
        self.anthropic_cache.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TetherError;
    use crate::tools::{ToolDefinition, handler_fn, sync_handler_fn};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingRemote {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RemoteToolClient for CountingRemote {
        async fn call_tool(&self, name: &str, _arguments: Value) -> crate::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TetherError::Remote("HTTP 503: down".to_string()))
            } else {
                Ok(json!(format!("remote:{}", name)))
            }
        }
    }

    fn schema() -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }

    fn invoker_with(registry: Arc<ToolRegistry>, remote: Arc<CountingRemote>) -> ToolInvoker {
        ToolInvoker::new(ClientSettings::default())
            .with_registry(registry)
            .with_remote(remote)
            .with_policy(RetryPolicy::tool_calls().with_base_delay(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_fallback() {
        let remote = Arc::new(CountingRemote::default());
        let invoker = invoker_with(Arc::new(ToolRegistry::new()), Arc::clone(&remote));

        let err = invoker.call("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::NotFound { ref name, .. } if name == "missing"));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_falls_back() {
        let registry = Arc::new(ToolRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(
                ToolDefinition::new("flaky").with_schema(schema()),
                handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(ToolError::unavailable("connection refused")) }
                }),
            )
            .unwrap();
        let remote = Arc::new(CountingRemote::default());
        let invoker = invoker_with(registry, Arc::clone(&remote));

        let value = invoker.call("flaky", json!({})).await.unwrap();
        assert_eq!(value, json!("remote:flaky"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_tries_remote_once_then_fails() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDefinition::new("broken").with_schema(schema()),
                sync_handler_fn(|_| Err(ToolError::execution("division by zero"))),
            )
            .unwrap();
        let remote = Arc::new(CountingRemote {
            fail: true,
            ..Default::default()
        });
        let invoker = invoker_with(registry, Arc::clone(&remote));

        let err = invoker.call("broken", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            InvokeError::Failed {
                attempts: 1,
                message: "division by zero".to_string()
            }
        );
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_arguments_surface_without_retry_or_fallback() {
        let registry = Arc::new(ToolRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(
                ToolDefinition::new("bind").with_schema(schema()),
                sync_handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // "port" is a retryable tool-call pattern
                    Err(ToolError::invalid_arguments("port must be an integer"))
                }),
            )
            .unwrap();
        let remote = Arc::new(CountingRemote::default());
        let invoker = invoker_with(registry, Arc::clone(&remote));

        let err = invoker.call("bind", json!({"port": "x"})).await.unwrap_err();
        assert_eq!(
            err,
            InvokeError::InvalidArguments {
                name: "bind".to_string(),
                message: "port must be an integer".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_not_found_and_cancelled_skip_fallback() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDefinition::new("lookup").with_schema(schema()),
                sync_handler_fn(|_| Err(ToolError::not_found("connection profile 'x' missing"))),
            )
            .unwrap();
        registry
            .register(
                ToolDefinition::new("abort").with_schema(schema()),
                sync_handler_fn(|_| Err(ToolError::cancelled("user aborted"))),
            )
            .unwrap();
        let remote = Arc::new(CountingRemote::default());
        let invoker = invoker_with(registry, Arc::clone(&remote));

        let err = invoker.call("lookup", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::NotFound { ref name, .. } if name == "lookup"));
        let err = invoker.call("abort", json!({})).await.unwrap_err();
        assert_eq!(err, InvokeError::Cancelled("user aborted".to_string()));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_kind_retried_without_pattern_match() {
        let registry = Arc::new(ToolRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(
                ToolDefinition::new("warming").with_schema(schema()),
                sync_handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ToolError::unavailable("model still loading"))
                }),
            )
            .unwrap();
        let remote = Arc::new(CountingRemote::default());
        let invoker = invoker_with(registry, Arc::clone(&remote));

        assert_eq!(invoker.call("warming", json!({})).await.unwrap(), json!("remote:warming"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_retry() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDefinition::new("slow").with_schema(schema()),
                sync_handler_fn(|_| Err(ToolError::timeout("timeout waiting for port"))),
            )
            .unwrap();
        let remote = Arc::new(CountingRemote::default());
        let invoker = invoker_with(registry, Arc::clone(&remote));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = invoker.call_with_cancel("slow", json!({}), &cancel).await.unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled(_)));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_registry_uses_remote() {
        let remote = Arc::new(CountingRemote::default());
        let invoker = ToolInvoker::new(ClientSettings::default()).with_remote(remote.clone());
        assert_eq!(invoker.call("any", json!({})).await.unwrap(), json!("remote:any"));
        assert!(invoker.list_tools().is_empty());
    }

    #[test]
    fn test_projections_put_core_tools_first_and_limit() {
        let registry = Arc::new(ToolRegistry::new());
        for name in ["zeta", "read_file", "alpha", "run_command"] {
            registry
                .register(
                    ToolDefinition::new(name).with_schema(schema()),
                    sync_handler_fn(|_| Ok(Value::Null)),
                )
                .unwrap();
        }
        let invoker = ToolInvoker::new(ClientSettings::default()).with_registry(Arc::clone(&registry));

        let names = |tools: Vec<Value>| -> Vec<String> {
            tools.iter().map(|t| t["name"].as_str().unwrap().to_string()).collect()
        };

        assert_eq!(
            names(invoker.gemini_tools(false, None)),
            vec!["read_file", "run_command", "zeta", "alpha"]
        );
        assert_eq!(names(invoker.gemini_tools(false, Some(2))), vec!["read_file", "run_command"]);

        let gemini = invoker.gemini_tools(false, Some(1));
        assert_eq!(gemini[0]["parameters"]["type"], "OBJECT");
        assert_eq!(gemini[0]["parameters"]["properties"]["text"]["type"], "STRING");

        let anthropic = invoker.anthropic_tools(false, Some(1));
        assert_eq!(anthropic[0]["input_schema"]["properties"]["text"]["type"], "string");
    }

    #[tokio::test(start_paused = true)]
    async fn test_projection_cache_ttl_and_refresh() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDefinition::new("first").with_schema(schema()),
                sync_handler_fn(|_| Ok(Value::Null)),
            )
            .unwrap();
        let invoker = ToolInvoker::new(ClientSettings::default()).with_registry(Arc::clone(&registry));
        assert_eq!(invoker.gemini_tools(false, None).len(), 1);
        assert!(invoker.gemini_cache.get().is_some());
        assert!(invoker.anthropic_cache.get().is_none());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(invoker.gemini_cache.get().is_none());

        invoker.gemini_tools(true, None);
        invoker.invalidate_caches();
        assert!(invoker.gemini_cache.get().is_none());

        invoker.gemini_tools(false, None);
        registry
            .register(
                ToolDefinition::new("second").with_schema(schema()),
                sync_handler_fn(|_| Ok(Value::Null)),
            )
            .unwrap();
        assert_eq!(invoker.gemini_tools(false, None).len(), 2);
    }
}
