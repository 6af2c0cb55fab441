//! Error classification by message signature

use serde::{Deserialize, Serialize};
use std::fmt;

const SSL_TERMS: &[&str] = &[
    "ssl",
    "certificate",
    "handshake",
    "connection reset",
    "broken pipe",
    "eof occurred",
];
const RATE_LIMIT_TERMS: &[&str] = &["429", "resource_exhausted"];
const UNAVAILABLE_TERMS: &[&str] = &["503", "unavailable", "overloaded"];
const SERVER_FAULT_TERMS: &[&str] = &["500", "502"];

/// Coarse failure category shared by the retry engine and the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// TLS / connection-level transport failure
    Ssl,
    /// Upstream quota or rate limit
    RateLimit,
    /// 5xx-style upstream failure
    ServerError,
    /// Deadline exceeded
    Timeout,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Multiplier applied to the exponential backoff for this category
    pub fn backoff_factor(self) -> f64 {
        match self {
            ErrorCategory::ServerError => 1.5,
            ErrorCategory::Timeout => 1.2,
            ErrorCategory::RateLimit | ErrorCategory::Ssl | ErrorCategory::Unknown => 1.0,
        }
    }

    /// Stable lower-case name, also used as the error-monitor type key
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Ssl => "ssl",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an error message. First match wins, in this order:
/// ssl terms, rate limit, 503/unavailable/overloaded, timeout, 500/502.
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

    if has(SSL_TERMS) {
        ErrorCategory::Ssl
    } else if has(RATE_LIMIT_TERMS) {
        ErrorCategory::RateLimit
    } else if has(UNAVAILABLE_TERMS) {
        ErrorCategory::ServerError
    } else if lower.contains("timeout") {
        ErrorCategory::Timeout
    } else if has(SERVER_FAULT_TERMS) {
        ErrorCategory::ServerError
    } else {
        ErrorCategory::Unknown
    }
}

/// Classify anything with a `Display` impl
pub fn classify_error<E: fmt::Display + ?Sized>(error: &E) -> ErrorCategory {
    classify(&error.to_string())
}
