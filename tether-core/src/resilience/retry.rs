//! Retry with exponential backoff, category weighting, and jitter
//!
//! `retry` returns the operation's own error after the last attempt; there
//! is no wrapper type. The streaming variant re-invokes the factory on a
//! retryable failure, so items yielded by a failed attempt are NOT withdrawn:
//! consumers see the leading items again and must tolerate or drop
//! duplicates themselves.

use super::classify::{ErrorCategory, classify};
use crate::config::RetrySettings;
use crate::util::truncate;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Signatures that mark upstream LLM errors as transient
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "429",
    "resource_exhausted",
    "500",
    "502",
    "503",
    "timeout",
    "overloaded",
    "unavailable",
    "ssl",
    "certificate",
    "handshake",
    "connection reset",
    "broken pipe",
    "eof occurred",
];

/// Signatures that mark in-process tool call errors as transient
pub const TOOL_CALL_RETRYABLE_PATTERNS: &[&str] = &[
    "connection",
    "timeout",
    "busy",
    "port",
    "address already in use",
    "temporarily unavailable",
    "resource exhausted",
];

/// Custom retryability check over the lower-cased error message
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Immutable retry policy, cheap to clone and share
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: usize,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for any single sleep
    pub max_delay: Duration,
    /// Positive jitter fraction
    pub jitter: f64,
    patterns: Vec<String>,
    predicate: Option<RetryPredicate>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("patterns", &self.patterns)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Build a policy with the default pattern set from settings
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            jitter: settings.jitter,
            patterns: DEFAULT_RETRYABLE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            predicate: None,
        }
    }

    /// Policy for in-process tool calls (3 attempts, 0.5s base, no jitter)
    pub fn tool_calls() -> Self {
        Self::from_settings(&RetrySettings::tool_calls())
            .with_patterns(TOOL_CALL_RETRYABLE_PATTERNS)
    }

    /// Tool-call patterns with the timing taken from settings
    pub fn tool_calls_from_settings(settings: &RetrySettings) -> Self {
        Self::from_settings(settings).with_patterns(TOOL_CALL_RETRYABLE_PATTERNS)
    }

    /// Single attempt, never retries
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter fraction, clamped to 0.0..=1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryable substring set
    pub fn with_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.patterns = patterns.iter().map(|p| p.as_ref().to_lowercase()).collect();
        self
    }

    /// Install a predicate that fully overrides the substring check
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Retryable substrings
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Decide retryability of an error message
    pub fn is_retryable(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        match &self.predicate {
            Some(predicate) => predicate(&lower),
            None => self.patterns.iter().any(|p| lower.contains(p.as_str())),
        }
    }
}

/// Backoff before retry number `attempt` (1-based):
/// `base * 2^(attempt-1) * factor(category) * (1 + U(0, jitter))`, capped at `max_delay`.
pub fn backoff_delay(attempt: usize, category: ErrorCategory, policy: &RetryPolicy) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
    let mut secs = policy.base_delay.as_secs_f64() * 2f64.powi(exponent);
    secs *= category.backoff_factor();

    if policy.jitter > 0.0 {
        secs *= 1.0 + rand::thread_rng().gen_range(0.0..=policy.jitter);
    }

    let capped = secs.min(policy.max_delay.as_secs_f64());
    if capped.is_finite() && capped >= 0.0 {
        Duration::from_secs_f64(capped)
    } else {
        policy.max_delay
    }
}

/// Execute an async operation with retries
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    run(policy, None, operation, by_message::<E>(policy), |_: usize, _: &E, _: Duration| {}).await
}

/// Like [`retry`], calling `observer(attempt, &error, delay)` before each backoff sleep
pub async fn retry_with_observer<F, Fut, T, E, O>(
    policy: &RetryPolicy,
    operation: F,
    observer: O,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    O: FnMut(usize, &E, Duration),
{
    run(policy, None, operation, by_message::<E>(policy), observer).await
}

/// Like [`retry`], but stops as soon as `cancel` fires.
///
/// Once cancellation is observed no further sleep or attempt happens and the
/// most recent error is returned.
pub async fn retry_with_cancel<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    run(
        policy,
        Some(cancel),
        operation,
        by_message::<E>(policy),
        |_: usize, _: &E, _: Duration| {},
    )
    .await
}

/// Like [`retry_with_cancel`], but `retryable` inspects the typed error
/// instead of the policy's message check. Timing still comes from `policy`.
pub async fn retry_with_cancel_when<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    retryable: R,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    R: Fn(&E) -> bool,
{
    run(
        policy,
        Some(cancel),
        operation,
        |error: &E, _: &str| retryable(error),
        |_: usize, _: &E, _: Duration| {},
    )
    .await
}

fn by_message<E>(policy: &RetryPolicy) -> impl Fn(&E, &str) -> bool + '_ {
    move |_: &E, message: &str| policy.is_retryable(message)
}

async fn run<F, Fut, T, E, R, O>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut operation: F,
    retryable: R,
    mut observer: O,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    R: Fn(&E, &str) -> bool,
    O: FnMut(usize, &E, Duration),
{
    let mut attempt = 0usize;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let message = error.to_string();
        if !retryable(&error, &message) {
            tracing::debug!(attempt, error = %truncate(&message, 100), "non-retryable error");
            return Err(error);
        }
        if attempt >= policy.max_attempts {
            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts,
                error = %truncate(&message, 200),
                "retries exhausted"
            );
            return Err(error);
        }
        if cancel.is_some_and(|token| token.is_cancelled()) {
            tracing::debug!(attempt, "retry cancelled");
            return Err(error);
        }

        let category = classify(&message);
        let delay = backoff_delay(attempt, category, policy);

        tracing::warn!(
            attempt,
            max_attempts = policy.max_attempts,
            error_type = %category,
            delay_ms = delay.as_millis() as u64,
            error = %truncate(&message, 100),
            "retry scheduled"
        );

        observer(attempt, &error, delay);

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(attempt, "retry cancelled during backoff");
                        return Err(error);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

/// Retry a stream factory. See the module docs for duplicate-item semantics.
pub fn retry_stream<F, S, T, E>(policy: RetryPolicy, factory: F) -> impl Stream<Item = Result<T, E>>
where
    F: FnMut() -> S,
    S: Stream<Item = Result<T, E>>,
    E: fmt::Display,
{
    retry_stream_with_observer(policy, factory, |_: usize, _: &E, _: Duration| {})
}

/// [`retry_stream`] with an observer invoked before each backoff sleep
pub fn retry_stream_with_observer<F, S, T, E, O>(
    policy: RetryPolicy,
    mut factory: F,
    mut observer: O,
) -> impl Stream<Item = Result<T, E>>
where
    F: FnMut() -> S,
    S: Stream<Item = Result<T, E>>,
    E: fmt::Display,
    O: FnMut(usize, &E, Duration),
{
    try_stream! {
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let mut inner = Box::pin(factory());
            let mut failure = None;

            while let Some(item) = inner.next().await {
                match item {
                    Ok(value) => yield value,
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }

            let Some(error) = failure else {
                break;
            };

            let message = error.to_string();
            if !policy.is_retryable(&message) || attempt >= policy.max_attempts {
                tracing::debug!(attempt, error = %truncate(&message, 100), "stream retry giving up");
                Err::<(), E>(error)?;
            } else {
                let category = classify(&message);
                let delay = backoff_delay(attempt, category, &policy);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error_type = %category,
                    delay_ms = delay.as_millis() as u64,
                    error = %truncate(&message, 100),
                    "stream retry scheduled"
                );
                observer(attempt, &error, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
