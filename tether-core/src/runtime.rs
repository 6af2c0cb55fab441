//! Composition root
//!
//! [`Runtime`] builds every shared component once from a [`TetherConfig`]
//! and hands out `Arc`s to them. Nothing in the crate is a global.

use crate::client::ToolInvoker;
use crate::config::TetherConfig;
use crate::error::Result;
use crate::mcp::{Dispatcher, DispatcherStatus};
use crate::monitoring::{ErrorMonitor, ErrorWindowStats};
use crate::resilience::{UpstreamRegistry, UpstreamStatus};
use crate::tasks::{TaskSummary, TaskTracker};
use crate::tools::{ToolMetricsSnapshot, ToolRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub dispatcher: DispatcherStatus,
    pub tools: BTreeMap<String, ToolMetricsSnapshot>,
    pub tasks: TaskSummary,
    pub upstreams: Vec<UpstreamStatus>,
    pub errors: BTreeMap<String, ErrorWindowStats>,
}

#[derive(Debug, Clone)]
pub struct Runtime {
    config: Arc<TetherConfig>,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    invoker: Arc<ToolInvoker>,
    monitor: Arc<ErrorMonitor>,
    tasks: Arc<TaskTracker>,
    upstreams: Arc<UpstreamRegistry>,
}

impl Runtime {
    /// Validate `config` and wire all components from it
    pub fn from_config(config: &TetherConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ToolRegistry::new());
        let monitor = Arc::new(ErrorMonitor::from_settings(&config.monitor));
        let dispatcher = Arc::new(Dispatcher::from_config(config, Arc::clone(&registry)));
        let invoker = Arc::new(ToolInvoker::from_config(config, Arc::clone(&registry)));
        let tasks = Arc::new(TaskTracker::from_settings(&config.tasks));
        let upstreams =
            Arc::new(UpstreamRegistry::from_config(config).with_monitor(Arc::clone(&monitor)));

        tracing::info!(
            server = %config.server.name,
            version = %config.server.version,
            "runtime initialized"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            registry,
            dispatcher,
            invoker,
            monitor,
            tasks,
            upstreams,
        })
    }

    /// Load configuration from the usual sources, then build
    pub fn load() -> Result<Self> {
        Self::from_config(&TetherConfig::load()?)
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn invoker(&self) -> &Arc<ToolInvoker> {
        &self.invoker
    }

    pub fn monitor(&self) -> &Arc<ErrorMonitor> {
        &self.monitor
    }

    pub fn tasks(&self) -> &Arc<TaskTracker> {
        &self.tasks
    }

    pub fn upstreams(&self) -> &Arc<UpstreamRegistry> {
        &self.upstreams
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            dispatcher: self.dispatcher.status(),
            tools: self.registry.all_metrics(),
            tasks: self.tasks.summary(),
            upstreams: self.upstreams.status(),
            errors: self.monitor.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolDefinition, sync_handler_fn};
    use serde_json::json;

    #[tokio::test]
    async fn test_components_share_one_registry() {
        let runtime = Runtime::from_config(&TetherConfig::default()).unwrap();
        runtime
            .dispatcher()
            .register_tool(
                ToolDefinition::new("echo").with_schema(json!({"type": "object"})),
                sync_handler_fn(|args| Ok(args)),
            )
            .unwrap();

        let value = runtime.invoker().call("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(value, json!({"a": 1}));

        let status = runtime.status();
        assert_eq!(status.dispatcher.tools, 1);
        assert_eq!(status.tools["echo"].call_count, 1);
        assert!(status.upstreams.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TetherConfig::default();
        config.tasks.capacity = 0;
        assert!(Runtime::from_config(&config).is_err());
    }
}
