//! Tether CLI - serve the tool dispatcher and inspect configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::config::TetherConfig;
use tether_core::mcp::{PromptDescriptor, PromptTemplate, ResourceDescriptor, StdioTransport, resource_fn};
use tether_core::runtime::Runtime;
use tether_core::tools::{ToolDefinition, ToolError, sync_handler_fn};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether tool server CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to tether.toml plus environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dispatcher over stdin/stdout
    Serve,
    /// Call a tool once through the invoker and print the result
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Print the merged configuration as JSON
    Config,
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<TetherConfig> {
    let config = match path {
        Some(path) => TetherConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TetherConfig::load().context("failed to load config")?,
    };
    Ok(config)
}

/// Runtime with the built-in demo tool, resource and prompt registered
fn demo_runtime(config: &TetherConfig) -> Result<Runtime> {
    let runtime = Runtime::from_config(config)?;
    let dispatcher = runtime.dispatcher();

    dispatcher.register_tool(
        ToolDefinition::new("echo")
            .with_category("demo")
            .with_description("Echo the given text back")
            .with_schema(json!({
                "type": "object",
                "properties": {"text": {"type": "string", "description": "Text to echo"}},
                "required": ["text"]
            })),
        sync_handler_fn(|args| match args.get("text").and_then(Value::as_str) {
            Some(text) => Ok(Value::String(text.to_string())),
            None => Err(ToolError::invalid_arguments("missing required argument: text")),
        }),
    )?;

    // Component handles only: the runtime owns the dispatcher this is registered on
    let (registry, tasks, upstreams, monitor) = (
        Arc::clone(runtime.registry()),
        Arc::clone(runtime.tasks()),
        Arc::clone(runtime.upstreams()),
        Arc::clone(runtime.monitor()),
    );
    dispatcher.register_resource(
        ResourceDescriptor::new("tether://status", "Runtime status")
            .with_description("Tool metrics, task summary, upstream circuits and error windows"),
        resource_fn(move || {
            let status = json!({
                "tools": registry.all_metrics(),
                "tasks": tasks.summary(),
                "upstreams": upstreams.status(),
                "errors": monitor.stats(),
            });
            async move { Ok(status) }
        }),
    );

    dispatcher.register_prompt(
        PromptDescriptor::new("summarize", "Summarize a piece of text").with_argument(
            "text",
            "Text to summarize",
            true,
        ),
        Arc::new(PromptTemplate::new("Summarize the following text concisely:\n\n{{text}}").require("text")),
    );

    Ok(runtime)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol frames, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
            println!("tether-core {}", tether_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Call { name, args } => {
            let config = load_config(cli.config.as_ref())?;
            let runtime = demo_runtime(&config)?;
            let args: Value = serde_json::from_str(&args).context("arguments must be a JSON object")?;
            let result = runtime.invoker().call(&name, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve => {
            let config = load_config(cli.config.as_ref())?;
            let runtime = demo_runtime(&config)?;
            tracing::info!(version = tether_core::VERSION, "serving on stdio");
            let mut transport = StdioTransport::stdio();
            runtime.dispatcher().run(&mut transport).await?;
        }
    }

    Ok(())
}
