//! Typed failures reported by tool handlers

use serde::{Deserialize, Serialize};

/// Error category reported by a tool handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments failed validation
    InvalidArguments,
    /// A resource the tool needed does not exist
    NotFound,
    /// The tool backend is temporarily unavailable
    Unavailable,
    /// The tool ran and failed
    Execution,
    /// The tool did not finish in time
    Timeout,
    /// The call was cancelled
    Cancelled,
}

impl ToolErrorKind {
    /// Whether a retry may succeed
    pub fn is_retryable(self) -> bool {
        matches!(self, ToolErrorKind::Unavailable | ToolErrorKind::Timeout)
    }

    /// The caller got something wrong; repeating the call elsewhere cannot help
    pub fn is_caller_error(self) -> bool {
        matches!(
            self,
            ToolErrorKind::InvalidArguments | ToolErrorKind::NotFound | ToolErrorKind::Cancelled
        )
    }
}

/// Failure returned by a tool handler.
///
/// Displays as the bare message so that message-based classification and
/// retry patterns see exactly what the handler reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Unavailable, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, message)
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::invalid_arguments(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_message() {
        let err = ToolError::unavailable("port 8555 busy");
        assert_eq!(err.to_string(), "port 8555 busy");
        assert!(err.kind.is_retryable());
        assert!(!ToolErrorKind::InvalidArguments.is_retryable());
        assert!(ToolErrorKind::InvalidArguments.is_caller_error());
        assert!(!ToolErrorKind::Execution.is_caller_error());
    }

    #[test]
    fn test_from_serde_error() {
        let err: ToolError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }
}
