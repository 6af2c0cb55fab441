//! Protocol dispatcher
//!
//! Routes typed requests to the tools, resources and prompts registered by
//! the host. Listings are served from a manifest that is rebuilt lazily the
//! first time it is read after a registration.

use super::prompts::PromptGenerator;
use super::protocol::*;
use super::resources::ResourceHandler;
use super::transport::Transport;
use crate::config::{ServerSettings, TetherConfig, VisibilitySettings};
use crate::error::Result;
use crate::tools::{RegistryError, ToolDefinition, ToolErrorKind, ToolHandler, ToolRegistry};
use crate::util::truncate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Longest handler error message passed back to callers
const MAX_ERROR_MESSAGE: usize = 500;

/// Server descriptor plus the full listings, as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub server: InitializeResult,
    pub resources: Vec<ResourceDescriptor>,
    pub tools: Vec<ProtocolTool>,
    pub prompts: Vec<PromptDescriptor>,
}

/// Registration counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStatus {
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
}

struct ResourceEntry {
    descriptor: ResourceDescriptor,
    handler: Arc<dyn ResourceHandler>,
}

struct PromptEntry {
    descriptor: PromptDescriptor,
    generator: Arc<dyn PromptGenerator>,
}

/// Cache key: (tool registry generation, dispatcher generation)
type ManifestKey = (u64, u64);

pub struct Dispatcher {
    settings: ServerSettings,
    visibility: VisibilitySettings,
    tools: Arc<ToolRegistry>,
    resources: RwLock<Vec<ResourceEntry>>,
    prompts: RwLock<Vec<PromptEntry>>,
    generation: AtomicU64,
    manifest: Mutex<Option<(ManifestKey, Arc<Manifest>)>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .field("status", &self.status())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(settings: ServerSettings, tools: Arc<ToolRegistry>) -> Self {
        Self {
            settings,
            visibility: VisibilitySettings::default(),
            tools,
            resources: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            manifest: Mutex::new(None),
        }
    }

    pub fn from_config(config: &TetherConfig, tools: Arc<ToolRegistry>) -> Self {
        Self::new(config.server.clone(), tools).with_visibility(config.visibility.clone())
    }

    /// Hide tools from `tools/list`; hidden tools remain callable
    pub fn with_visibility(mut self, visibility: VisibilitySettings) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Register a resource; a second registration for the same URI replaces the first
    pub fn register_resource(&self, descriptor: ResourceDescriptor, handler: Arc<dyn ResourceHandler>) {
        let mut resources = self.resources.write().unwrap_or_else(|e| e.into_inner());
        let entry = ResourceEntry {
            descriptor,
            handler,
        };
        match resources.iter_mut().find(|r| r.descriptor.uri == entry.descriptor.uri) {
            Some(existing) => {
                tracing::warn!(uri = %entry.descriptor.uri, "resource is being re-registered");
                *existing = entry;
            }
            None => {
                tracing::debug!(uri = %entry.descriptor.uri, "resource registered");
                resources.push(entry);
            }
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Register a prompt; a second registration for the same name replaces the first
    pub fn register_prompt(&self, descriptor: PromptDescriptor, generator: Arc<dyn PromptGenerator>) {
        let mut prompts = self.prompts.write().unwrap_or_else(|e| e.into_inner());
        let entry = PromptEntry {
            descriptor,
            generator,
        };
        match prompts.iter_mut().find(|p| p.descriptor.name == entry.descriptor.name) {
            Some(existing) => {
                tracing::warn!(prompt = %entry.descriptor.name, "prompt is being re-registered");
                *existing = entry;
            }
            None => {
                tracing::debug!(prompt = %entry.descriptor.name, "prompt registered");
                prompts.push(entry);
            }
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Register a tool in the backing registry
    pub fn register_tool(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> std::result::Result<(), RegistryError> {
        self.tools.register(definition, handler)
    }

    pub fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            tools: self.tools.len(),
            resources: self.resources.read().unwrap_or_else(|e| e.into_inner()).len(),
            prompts: self.prompts.read().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }

    fn manifest_key(&self) -> ManifestKey {
        (self.tools.generation(), self.generation.load(Ordering::Acquire))
    }

    /// Current manifest, rebuilt only if something was registered since the last build
    pub fn manifest(&self) -> Arc<Manifest> {
        let key = self.manifest_key();
        let mut cached = self.manifest.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached_key, manifest)) = cached.as_ref() {
            if *cached_key == key {
                return Arc::clone(manifest);
            }
        }

        let manifest = Arc::new(self.build_manifest());
        tracing::debug!(
            tools = manifest.tools.len(),
            resources = manifest.resources.len(),
            prompts = manifest.prompts.len(),
            "manifest rebuilt"
        );
        *cached = Some((key, Arc::clone(&manifest)));
        manifest
    }

    fn build_manifest(&self) -> Manifest {
        let server = InitializeResult {
            protocol_version: self.settings.protocol_version.clone(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: self.settings.name.clone(),
                version: self.settings.version.clone(),
            },
        };
        let tools = self
            .tools
            .list_schemas(&self.visibility)
            .into_iter()
            .map(|t| ProtocolTool {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();
        let resources = self
            .resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.descriptor.clone())
            .collect();
        let prompts = self
            .prompts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|p| p.descriptor.clone())
            .collect();

        Manifest {
            server,
            resources,
            tools,
            prompts,
        }
    }

    /// Handle one request. Every failure becomes a structured error response.
    pub async fn dispatch(&self, request: ProtocolRequest) -> ProtocolResponse {
        let ProtocolRequest {
            jsonrpc,
            id,
            method,
            params,
        } = request;

        if jsonrpc != JSONRPC_VERSION {
            return ProtocolResponse::error(
                id,
                ProtocolError::new(
                    ProtocolError::INVALID_REQUEST,
                    format!("Unsupported jsonrpc version: {}", jsonrpc),
                ),
            );
        }

        let method = match method.parse::<Method>() {
            Ok(method) => method,
            Err(e) => {
                tracing::debug!(method = %method, "unknown method");
                return ProtocolResponse::error(id, e);
            }
        };

        let outcome = match method {
            Method::Initialize => to_result(&self.manifest().server),
            Method::ResourcesList => Ok(json!({ "resources": self.manifest().resources })),
            Method::ResourcesRead => self.read_resource(params).await,
            Method::ToolsList => Ok(json!({ "tools": self.manifest().tools })),
            Method::ToolsCall => self.call_tool(params).await,
            Method::PromptsList => Ok(json!({ "prompts": self.manifest().prompts })),
            Method::PromptsGet => self.get_prompt(params).await,
        };

        match outcome {
            Ok(result) => ProtocolResponse::success(id, result),
            Err(error) => ProtocolResponse::error(id, error),
        }
    }

    async fn read_resource(&self, params: Option<Value>) -> std::result::Result<Value, ProtocolError> {
        let ResourceReadParams { uri } = parse_params(params)?;
        let handler = self
            .resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.descriptor.uri == uri)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| ProtocolError::invalid_params(format!("Unknown resource: {}", uri)))?;

        let content = handler.read(&uri).await.map_err(|e| {
            tracing::error!(uri = %uri, error = %e, "resource read failed");
            handler_error(e.kind, &e.message)
        })?;
        to_result(&ResourceReadResult {
            contents: vec![content],
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, ProtocolError> {
        let ToolCallParams { name, arguments } = parse_params(params)?;
        let handler = self.tools.get_handler(&name).map_err(|e| {
            tracing::debug!(tool = %name, "unknown tool requested");
            ProtocolError::invalid_params(e.to_string())
        })?;

        let started = Instant::now();
        let outcome = handler.call(Value::Object(arguments)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                tracing::info!(tool = %name, elapsed_ms, "tool call completed");
                to_result(&ToolCallResult {
                    content: vec![ContentBlock::from_value(&value)],
                })
            }
            Err(e) => {
                tracing::error!(tool = %name, elapsed_ms, kind = ?e.kind, error = %e, "tool call failed");
                Err(handler_error(e.kind, &e.message))
            }
        }
    }

    async fn get_prompt(&self, params: Option<Value>) -> std::result::Result<Value, ProtocolError> {
        let PromptGetParams { name, arguments } = parse_params(params)?;
        let generator = self
            .prompts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.descriptor.name == name)
            .map(|p| Arc::clone(&p.generator))
            .ok_or_else(|| ProtocolError::invalid_params(format!("Unknown prompt: {}", name)))?;

        let text = generator.generate(&arguments).await.map_err(|e| {
            tracing::error!(prompt = %name, error = %e, "prompt generation failed");
            handler_error(e.kind, &e.message)
        })?;
        to_result(&PromptGetResult {
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content: ContentBlock::text(text),
            }],
        })
    }

    /// Serve requests from `transport` until the peer closes it
    pub async fn run<T: Transport>(&self, transport: &mut T) -> Result<()> {
        tracing::info!(server = %self.settings.name, "dispatcher started");
        while let Some(request) = transport.receive().await? {
            let method = request.method.clone();
            let response = self.dispatch(request).await;
            if let Some(error) = &response.error {
                tracing::debug!(method = %method, code = error.code, "request failed");
            }
            transport.send(response).await?;
        }
        tracing::info!(server = %self.settings.name, "transport closed, dispatcher stopping");
        Ok(())
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, ProtocolError> {
    let params = params.ok_or_else(|| ProtocolError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| ProtocolError::invalid_params(format!("Invalid params: {}", e)))
}

fn to_result<T: Serialize>(value: &T) -> std::result::Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::internal_error(e.to_string()))
}

fn handler_error(kind: ToolErrorKind, message: &str) -> ProtocolError {
    let message = truncate(message, MAX_ERROR_MESSAGE);
    match kind {
        ToolErrorKind::InvalidArguments => ProtocolError::invalid_params(message),
        _ => ProtocolError::internal_error(message),
    }
}
