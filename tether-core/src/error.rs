//! Error types for Tether operations

/// Result type for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

/// Error types for the Tether tool-invocation core
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tool handler failure
    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    /// Registry lookup or registration failure
    #[error("Registry error: {0}")]
    Registry(#[from] crate::tools::RegistryError),

    /// Protocol-level failure (malformed frame, transport I/O)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Upstream circuit is open; the caller decides whether to wait
    #[error("Upstream temporarily unavailable, retry after {remaining_secs}s")]
    CircuitOpen {
        /// Upstream name
        upstream: String,
        /// Seconds until the circuit allows a trial call
        remaining_secs: u64,
    },

    /// Remote tool server failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// Task tracker failure
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for TetherError {
    fn from(s: String) -> Self {
        TetherError::Other(s)
    }
}

impl From<&str> for TetherError {
    fn from(s: &str) -> Self {
        TetherError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for TetherError {
    fn from(err: anyhow::Error) -> Self {
        TetherError::Other(err.to_string())
    }
}

impl From<figment::Error> for TetherError {
    fn from(err: figment::Error) -> Self {
        TetherError::Configuration(err.to_string())
    }
}

impl From<reqwest::Error> for TetherError {
    fn from(err: reqwest::Error) -> Self {
        TetherError::Remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message() {
        let err = TetherError::CircuitOpen {
            upstream: "anthropic".to_string(),
            remaining_secs: 42,
        };
        assert_eq!(
            err.to_string(),
            "Upstream temporarily unavailable, retry after 42s"
        );
    }

    #[test]
    fn test_from_str() {
        let err: TetherError = "boom".into();
        assert!(matches!(err, TetherError::Other(ref m) if m == "boom"));
    }
}
