//! Configuration types for the Tether tool-invocation core

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration for Tether
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Retry policy used around upstream LLM calls
    pub retry: RetrySettings,

    /// Retry policy used by the tool invoker for in-process calls
    pub tool_retry: RetrySettings,

    /// Circuit breaker thresholds and cooldowns
    pub circuit: CircuitSettings,

    /// Adaptive timeout constants
    pub timeouts: TimeoutSettings,

    /// Error monitor windows and thresholds
    pub monitor: MonitorSettings,

    /// Tool invoker settings (remote server, schema caches)
    pub client: ClientSettings,

    /// Task tracker settings
    pub tasks: TaskSettings,

    /// Externally visible tool listing filters
    pub visibility: VisibilitySettings,

    /// Protocol server descriptor
    pub server: ServerSettings,
}

/// Retry/backoff settings for one policy instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: usize,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on any single backoff sleep
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Positive jitter fraction (0.0..=1.0)
    pub jitter: f64,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            tool_retry: RetrySettings::tool_calls(),
            circuit: CircuitSettings::default(),
            timeouts: TimeoutSettings::default(),
            monitor: MonitorSettings::default(),
            client: ClientSettings::default(),
            tasks: TaskSettings::default(),
            visibility: VisibilitySettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.3,
        }
    }
}

impl RetrySettings {
    /// Defaults tuned for in-process tool calls
    pub fn tool_calls() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: usize,

    #[serde(with = "humantime_serde")]
    pub rate_limit_cooldown: Duration,

    #[serde(with = "humantime_serde")]
    pub server_error_cooldown: Duration,

    #[serde(with = "humantime_serde")]
    pub timeout_cooldown: Duration,

    /// Cooldown for every other category
    #[serde(with = "humantime_serde")]
    pub default_cooldown: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            rate_limit_cooldown: Duration::from_secs(300),
            server_error_cooldown: Duration::from_secs(60),
            timeout_cooldown: Duration::from_secs(30),
            default_cooldown: Duration::from_secs(30),
        }
    }
}

/// Adaptive timeout constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Global ceiling for a single upstream call
    #[serde(with = "humantime_serde")]
    pub api_call: Duration,

    /// Timeout between streamed chunks after the first
    #[serde(with = "humantime_serde")]
    pub stream_chunk: Duration,

    /// Base timeout for the first streamed chunk
    #[serde(with = "humantime_serde")]
    pub first_chunk_base: Duration,

    /// Subtracted from `api_call` to form the adaptive ceiling
    #[serde(with = "humantime_serde")]
    pub safety_margin: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            api_call: Duration::from_secs(180),
            stream_chunk: Duration::from_secs(60),
            first_chunk_base: Duration::from_secs(100),
            safety_margin: Duration::from_secs(10),
        }
    }
}

/// Error monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Sliding window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Minimum gap between two alerts of the same type
    #[serde(with = "humantime_serde")]
    pub alert_cooldown: Duration,

    /// Threshold for error types absent from `thresholds`
    pub default_threshold: u32,

    /// Per error-type thresholds
    pub thresholds: HashMap<String, u32>,

    /// Optional webhook receiving alert payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            alert_cooldown: Duration::from_secs(600),
            default_threshold: 10,
            thresholds: HashMap::from([
                ("503".to_string(), 3),
                ("429".to_string(), 5),
                ("timeout".to_string(), 5),
            ]),
            webhook_url: None,
        }
    }
}

/// Tool invoker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Base URL of the remote tool server used as fallback
    pub server_url: String,

    /// Time-to-live of the projected schema caches
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Default number of tools returned by a projection
    pub max_tools: usize,

    /// Tools always placed first in projections
    pub core_tools: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8555".to_string(),
            cache_ttl: Duration::from_secs(300),
            max_tools: 10,
            core_tools: [
                "run_command",
                "read_file",
                "list_directory",
                "delegate_to_opus",
                "retrieve_context",
                "store_memory",
                "tavily_search",
                "google_deep_research",
                "hass_control_light",
                "hass_control_device",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Task tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Table size above which finished tasks are evicted
    pub capacity: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Visibility filters applied to the external schema listing only
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VisibilitySettings {
    pub disabled_tools: Vec<String>,
    pub disabled_categories: Vec<String>,
}

/// Protocol server descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "tether-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: crate::mcp::PROTOCOL_VERSION.to_string(),
        }
    }
}

impl TetherConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (tether.toml)
    /// 3. File named by TETHER_CONFIG_PATH
    /// 4. Environment variable overrides (`TETHER_CLIENT__MAX_TOOLS=13`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(TetherConfig::default()))
            .merge(Toml::file("tether.toml"));

        if let Ok(path) = std::env::var("TETHER_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: TetherConfig = figment
            .merge(Env::prefixed("TETHER_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                crate::error::TetherError::Configuration(format!(
                    "Failed to load configuration: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: TetherConfig = Figment::from(Serialized::defaults(TetherConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                crate::error::TetherError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, retry) in [("retry", &self.retry), ("tool_retry", &self.tool_retry)] {
            if retry.max_attempts == 0 {
                return Err(crate::error::TetherError::Configuration(format!(
                    "{}.max_attempts must be at least 1",
                    name
                )));
            }
            if !(0.0..=1.0).contains(&retry.jitter) {
                return Err(crate::error::TetherError::Configuration(format!(
                    "{}.jitter must be within 0.0..=1.0, got {}",
                    name, retry.jitter
                )));
            }
            if retry.base_delay > retry.max_delay {
                return Err(crate::error::TetherError::Configuration(format!(
                    "{}.base_delay exceeds max_delay",
                    name
                )));
            }
        }

        if self.circuit.failure_threshold == 0 {
            return Err(crate::error::TetherError::Configuration(
                "circuit.failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.tasks.capacity == 0 {
            return Err(crate::error::TetherError::Configuration(
                "tasks.capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
