//! Reliability primitives for upstream and tool calls
//!
//! - [`classify`]: message-based error categories
//! - [`retry`]: exponential backoff with jitter, single-shot and streaming
//! - [`CircuitBreaker`] and [`AdaptiveTimeout`]: per-upstream protection
//! - [`UpstreamGuard`]: the three composed, one per provider

mod adaptive_timeout;
mod circuit_breaker;
mod classify;
mod guard;
mod retry;

pub use adaptive_timeout::{AdaptiveTimeout, LATENCY_WINDOW};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use classify::{ErrorCategory, classify, classify_error};
pub use guard::{GuardError, UpstreamGuard, UpstreamRegistry, UpstreamStatus};
pub use retry::{
    DEFAULT_RETRYABLE_PATTERNS, RetryPolicy, RetryPredicate, TOOL_CALL_RETRYABLE_PATTERNS,
    backoff_delay, retry, retry_stream, retry_stream_with_observer, retry_with_cancel,
    retry_with_cancel_when, retry_with_observer,
};
