//! Tool Registry for registration, lookup and schema listing
//!
//! Every handler is wrapped at registration time in an instrumentation
//! decorator that implements the same [`ToolHandler`] interface, so callers
//! cannot bypass metrics by holding on to a raw handler.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::tools::{ToolDefinition, ToolRegistry, sync_handler_fn};
//!
//! let registry = ToolRegistry::new();
//! registry.register(
//!     ToolDefinition::new("echo")
//!         .with_category("demo")
//!         .with_schema(json!({"type": "object", "properties": {"text": {"type": "string"}}})),
//!     sync_handler_fn(|args| Ok(args)),
//! )?;
//!
//! let handler = registry.get_handler("echo")?;
//! let out = handler.call(json!({"text": "hi"})).await?;
//! ```

use super::handler::ToolHandler;
use super::metrics::{ToolMetrics, ToolMetricsSnapshot};
use super::schema::ToolDescriptor;
use super::ToolError;
use crate::config::VisibilitySettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;

/// Names listed in a not-found error
const NOT_FOUND_SAMPLE: usize = 10;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No tool with this name
    #[error("Unknown tool: '{name}'. Available tools include: {}...", .available.join(", "))]
    NotFound {
        name: String,
        /// Up to ten registered names, sorted
        available: Vec<String>,
    },

    /// Name already taken under [`RegistrationPolicy::Reject`]
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// What happens when a name is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Last writer wins, with a warning
    #[default]
    Overwrite,
    /// Second registration fails with [`RegistryError::DuplicateTool`]
    Reject,
}

/// Declaration of a tool before registration
#[derive(Debug, Clone, Default)]
pub struct ToolDefinition {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    /// Identifier of the module that declared the tool
    pub module: Option<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// Registered tool metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub category: Option<String>,
    /// Declared description, or the first line of it, or `"Tool: <name>"`
    pub description: String,
    pub input_schema: Option<Value>,
    pub module: Option<String>,
}

struct ToolRecord {
    metadata: ToolMetadata,
    handler: Arc<InstrumentedHandler>,
    order: u64,
}

/// Decorator recording metrics around every call
struct InstrumentedHandler {
    name: String,
    inner: Arc<dyn ToolHandler>,
    metrics: Arc<ToolMetrics>,
}

/// Records the outcome when dropped, so a call that is cancelled or
/// panics still counts as an error.
struct CallRecorder<'a> {
    metrics: &'a ToolMetrics,
    started: Instant,
    outcome: Option<Result<(), String>>,
}

impl Drop for CallRecorder<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        match self.outcome.take() {
            Some(Ok(())) => self.metrics.record_success(elapsed),
            Some(Err(message)) => self.metrics.record_error(elapsed, &message),
            None => self.metrics.record_error(elapsed, "call aborted before completion"),
        }
    }
}

#[async_trait]
impl ToolHandler for InstrumentedHandler {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        self.metrics.record_start();
        let mut recorder = CallRecorder {
            metrics: &self.metrics,
            started: Instant::now(),
            outcome: None,
        };

        let result = self.inner.call(args).await;
        match &result {
            Ok(_) => recorder.outcome = Some(Ok(())),
            Err(e) => {
                tracing::debug!(tool = %self.name, error = %e, "tool call failed");
                recorder.outcome = Some(Err(e.to_string()));
            }
        }
        result
    }
}

/// Name-keyed map of instrumented handlers plus metadata.
///
/// Read-mostly: lookups take a shared lock, registration takes the write
/// lock and bumps [`generation`](Self::generation) so dependent caches can
/// tell when to rebuild.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolRecord>>,
    policy: RegistrationPolicy,
    next_order: AtomicU64,
    generation: AtomicU64,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Registry with the overwrite policy
    pub fn new() -> Self {
        Self::with_policy(RegistrationPolicy::Overwrite)
    }

    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            policy,
            next_order: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ToolRecord>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ToolRecord>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a tool, wrapping `handler` with metrics instrumentation
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        let ToolDefinition {
            name,
            category,
            description,
            input_schema,
            module,
        } = definition;

        let description = match description.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.lines().next().unwrap_or(text).trim().to_string(),
            _ => format!("Tool: {}", name),
        };

        let mut tools = self.write();
        let order = match tools.get(&name) {
            Some(existing) => match self.policy {
                RegistrationPolicy::Reject => {
                    return Err(RegistryError::DuplicateTool(name));
                }
                RegistrationPolicy::Overwrite => {
                    tracing::warn!(tool = %name, "tool is being re-registered, overwriting previous handler");
                    existing.order
                }
            },
            None => self.next_order.fetch_add(1, Ordering::Relaxed),
        };

        let record = ToolRecord {
            handler: Arc::new(InstrumentedHandler {
                name: name.clone(),
                inner: handler,
                metrics: Arc::new(ToolMetrics::default()),
            }),
            metadata: ToolMetadata {
                name: name.clone(),
                category,
                description,
                input_schema,
                module,
            },
            order,
        };

        tracing::debug!(tool = %name, "tool registered");
        tools.insert(name, record);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn not_found(tools: &HashMap<String, ToolRecord>, name: &str) -> RegistryError {
        let mut available: Vec<String> = tools.keys().cloned().collect();
        available.sort();
        available.truncate(NOT_FOUND_SAMPLE);
        RegistryError::NotFound {
            name: name.to_string(),
            available,
        }
    }

    /// Instrumented handler for `name`
    pub fn get_handler(&self, name: &str) -> Result<Arc<dyn ToolHandler>, RegistryError> {
        let tools = self.read();
        match tools.get(name) {
            Some(record) => Ok(record.handler.clone() as Arc<dyn ToolHandler>),
            None => Err(Self::not_found(&tools, name)),
        }
    }

    /// Look up and invoke `name` in one step
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, crate::TetherError> {
        let handler = self.get_handler(name)?;
        Ok(handler.call(args).await?)
    }

    /// Bumped on every registration
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All tool names, sorted
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names in `category`, sorted
    pub fn tools_by_category(&self, category: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .values()
            .filter(|r| r.metadata.category.as_deref() == Some(category))
            .map(|r| r.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.read().get(name).map(|r| r.metadata.clone())
    }

    /// Externally visible descriptors in registration order.
    ///
    /// Skips tools without a schema and tools hidden by `visibility`. Hidden
    /// tools stay callable through [`get_handler`](Self::get_handler).
    pub fn list_schemas(&self, visibility: &VisibilitySettings) -> Vec<ToolDescriptor> {
        let tools = self.read();
        let mut records: Vec<&ToolRecord> = tools.values().collect();
        records.sort_by_key(|r| r.order);

        records
            .into_iter()
            .filter_map(|record| {
                let meta = &record.metadata;
                if visibility.disabled_tools.iter().any(|t| t == &meta.name) {
                    return None;
                }
                if let Some(category) = &meta.category {
                    if visibility.disabled_categories.iter().any(|c| c == category) {
                        return None;
                    }
                }
                let Some(schema) = &meta.input_schema else {
                    tracing::debug!(tool = %meta.name, "tool missing input schema, skipped");
                    return None;
                };
                Some(ToolDescriptor {
                    name: meta.name.clone(),
                    description: meta.description.clone(),
                    input_schema: schema.clone(),
                })
            })
            .collect()
    }

    /// Live metrics handle for `name`
    pub fn metrics(&self, name: &str) -> Option<Arc<ToolMetrics>> {
        self.read().get(name).map(|r| Arc::clone(&r.handler.metrics))
    }

    /// Snapshots of every tool's metrics, keyed by name
    pub fn all_metrics(&self) -> BTreeMap<String, ToolMetricsSnapshot> {
        self.read()
            .iter()
            .map(|(name, r)| (name.clone(), r.handler.metrics.snapshot()))
            .collect()
    }

    /// Zero the metrics of every tool
    pub fn reset_metrics(&self) {
        for record in self.read().values() {
            record.handler.metrics.reset();
        }
    }
}
