//! Guarded upstream calls: circuit breaker + retry + adaptive timeout
//!
//! One [`UpstreamGuard`] exists per upstream provider and is shared by every
//! caller of that provider. [`UpstreamRegistry`] is the explicitly
//! constructed owner of those guards.

use super::adaptive_timeout::AdaptiveTimeout;
use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::classify::classify_error;
use super::retry::{RetryPolicy, retry_stream_with_observer, retry_with_observer};
use crate::config::{CircuitSettings, TetherConfig, TimeoutSettings};
use crate::error::TetherError;
use crate::monitoring::ErrorMonitor;
use crate::util::truncate;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Failure of a guarded call
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// Circuit is open; nothing was sent upstream
    #[error("Upstream temporarily unavailable, retry after {remaining_secs}s")]
    CircuitOpen {
        upstream: String,
        remaining_secs: u64,
    },

    /// The operation failed after the retry policy gave up
    #[error("{0}")]
    Upstream(E),
}

impl<E> GuardError<E> {
    /// Whether the call was rejected by the breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }

    /// The upstream error, if the call got that far
    pub fn into_upstream(self) -> Option<E> {
        match self {
            GuardError::Upstream(e) => Some(e),
            GuardError::CircuitOpen { .. } => None,
        }
    }
}

impl<E: fmt::Display> From<GuardError<E>> for TetherError {
    fn from(err: GuardError<E>) -> Self {
        match err {
            GuardError::CircuitOpen {
                upstream,
                remaining_secs,
            } => TetherError::CircuitOpen {
                upstream,
                remaining_secs,
            },
            GuardError::Upstream(e) => TetherError::Remote(e.to_string()),
        }
    }
}

/// Protection for one upstream provider
#[derive(Debug)]
pub struct UpstreamGuard {
    name: String,
    breaker: CircuitBreaker,
    timeout: AdaptiveTimeout,
    policy: RetryPolicy,
    monitor: Option<Arc<ErrorMonitor>>,
}

impl UpstreamGuard {
    pub fn new(
        name: impl Into<String>,
        circuit: CircuitSettings,
        timeouts: TimeoutSettings,
        policy: RetryPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), circuit),
            timeout: AdaptiveTimeout::new(timeouts),
            name,
            policy,
            monitor: None,
        }
    }

    /// Report every retried failure to `monitor`
    pub fn with_monitor(mut self, monitor: Arc<ErrorMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn adaptive_timeout(&self) -> &AdaptiveTimeout {
        &self.timeout
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Advisory deadline for the next call offering `tool_count` tools
    pub fn deadline(&self, tool_count: usize, is_first_chunk: bool) -> Duration {
        self.timeout.deadline(tool_count, is_first_chunk)
    }

    fn circuit_open<E>(&self) -> GuardError<E> {
        let remaining_secs = self.breaker.remaining_cooldown();
        tracing::warn!(upstream = %self.name, remaining_secs, "circuit open, call rejected");
        GuardError::CircuitOpen {
            upstream: self.name.clone(),
            remaining_secs,
        }
    }

    /// Run `operation` under the breaker and the retry policy.
    ///
    /// Open circuit: rejected without calling `operation`. Final failure:
    /// recorded on the breaker by category. Success: closes a half-open
    /// circuit and feeds the latency window.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if !self.breaker.can_proceed() {
            return Err(self.circuit_open());
        }

        let started = Instant::now();
        let monitor = self.monitor.clone();
        let result = retry_with_observer(&self.policy, operation, |_attempt, error: &E, _delay| {
            report(monitor.as_deref(), error)
        })
        .await;

        match result {
            Ok(value) => {
                let elapsed = started.elapsed();
                self.breaker.record_success();
                self.timeout.record_latency(elapsed);
                tracing::debug!(
                    upstream = %self.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "upstream call succeeded"
                );
                Ok(value)
            }
            Err(error) => {
                self.breaker.record_failure(classify_error(&error));
                Err(GuardError::Upstream(error))
            }
        }
    }

    /// Streaming variant of [`call`](Self::call).
    ///
    /// Retried attempts replay the stream from the start, so leading items
    /// may be seen more than once.
    pub fn call_stream<'a, F, S, T, E>(
        &'a self,
        factory: F,
    ) -> impl Stream<Item = Result<T, GuardError<E>>> + 'a
    where
        F: FnMut() -> S + 'a,
        S: Stream<Item = Result<T, E>> + 'a,
        T: 'a,
        E: fmt::Display + 'a,
    {
        try_stream! {
            if !self.breaker.can_proceed() {
                Err::<(), GuardError<E>>(self.circuit_open())?;
            }

            let started = Instant::now();
            let monitor = self.monitor.clone();
            let mut inner = Box::pin(retry_stream_with_observer(
                self.policy.clone(),
                factory,
                move |_attempt, error: &E, _delay| report(monitor.as_deref(), error),
            ));

            while let Some(item) = inner.next().await {
                match item {
                    Ok(value) => yield value,
                    Err(error) => {
                        self.breaker.record_failure(classify_error(&error));
                        Err::<(), GuardError<E>>(GuardError::Upstream(error))?;
                    }
                }
            }

            self.breaker.record_success();
            self.timeout.record_latency(started.elapsed());
        }
    }
}

fn report<E: fmt::Display>(monitor: Option<&ErrorMonitor>, error: &E) {
    if let Some(monitor) = monitor {
        let message = error.to_string();
        monitor.record(classify_error(&message).as_str(), &truncate(&message, 200));
    }
}

/// Point-in-time view of one upstream guard
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub remaining_cooldown_secs: u64,
    pub latency_samples: usize,
}

/// Process-wide owner of one guard per upstream name
#[derive(Debug)]
pub struct UpstreamRegistry {
    circuit: CircuitSettings,
    timeouts: TimeoutSettings,
    policy: RetryPolicy,
    monitor: Option<Arc<ErrorMonitor>>,
    guards: RwLock<HashMap<String, Arc<UpstreamGuard>>>,
}

impl UpstreamRegistry {
    pub fn new(circuit: CircuitSettings, timeouts: TimeoutSettings, policy: RetryPolicy) -> Self {
        Self {
            circuit,
            timeouts,
            policy,
            monitor: None,
            guards: RwLock::new(HashMap::new()),
        }
    }

    /// Build from the `retry`, `circuit` and `timeouts` sections
    pub fn from_config(config: &TetherConfig) -> Self {
        Self::new(
            config.circuit.clone(),
            config.timeouts.clone(),
            RetryPolicy::from_settings(&config.retry),
        )
    }

    /// Guards created from now on report to `monitor`
    pub fn with_monitor(mut self, monitor: Arc<ErrorMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Guard for `name`, created on first use
    pub fn guard(&self, name: &str) -> Arc<UpstreamGuard> {
        if let Some(guard) = self
            .guards
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Arc::clone(guard);
        }

        let mut guards = self.guards.write().unwrap_or_else(|e| e.into_inner());
        let guard = guards.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(upstream = %name, "creating upstream guard");
            let mut guard = UpstreamGuard::new(
                name,
                self.circuit.clone(),
                self.timeouts.clone(),
                self.policy.clone(),
            );
            if let Some(monitor) = &self.monitor {
                guard = guard.with_monitor(Arc::clone(monitor));
            }
            Arc::new(guard)
        });
        Arc::clone(guard)
    }

    /// Sorted names of the upstreams seen so far
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .guards
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Status of every known upstream, sorted by name
    pub fn status(&self) -> Vec<UpstreamStatus> {
        let guards = self.guards.read().unwrap_or_else(|e| e.into_inner());
        let mut statuses: Vec<UpstreamStatus> = guards
            .values()
            .map(|guard| UpstreamStatus {
                name: guard.name.clone(),
                state: guard.breaker.state(),
                failure_count: guard.breaker.failure_count(),
                remaining_cooldown_secs: guard.breaker.remaining_cooldown(),
                latency_samples: guard.timeout.samples(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard(attempts: usize) -> UpstreamGuard {
        UpstreamGuard::new(
            "anthropic",
            CircuitSettings::default(),
            TimeoutSettings::default(),
            RetryPolicy::default()
                .with_max_attempts(attempts)
                .with_base_delay(Duration::from_millis(10))
                .with_jitter(0.0),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_success_records_latency() {
        let guard = guard(3);
        let result: Result<&str, GuardError<&str>> = guard
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok("done")
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(guard.adaptive_timeout().samples(), 1);
        assert_eq!(guard.breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_opens_after_repeated_failed_calls() {
        let guard = guard(1);
        let attempts = AtomicUsize::new(0);

        for _ in 0..5 {
            let result: Result<(), GuardError<&str>> = guard
                .call(|| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("503 unavailable") }
                })
                .await;
            assert!(matches!(result, Err(GuardError::Upstream("503 unavailable"))));
        }
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        let rejected: Result<(), GuardError<&str>> = guard
            .call(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(rejected.as_ref().is_err_and(|e| e.is_circuit_open()));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        let err: TetherError = rejected.unwrap_err().into();
        assert_eq!(
            err.to_string(),
            "Upstream temporarily unavailable, retry after 60s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_stream_records_outcome() {
        let guard = guard(2);
        let items: Vec<_> = guard
            .call_stream(|| futures::stream::iter(vec![Ok::<_, &str>(1), Ok(2)]))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(guard.adaptive_timeout().samples(), 1);

        let failed: Vec<Result<i32, GuardError<&str>>> = guard
            .call_stream(|| futures::stream::iter(vec![Err("invalid key")]))
            .collect()
            .await;
        assert_eq!(failed.len(), 1);
        assert_eq!(guard.breaker().failure_count(), 1);
    }

    #[test]
    fn test_registry_returns_shared_guard() {
        let registry = UpstreamRegistry::from_config(&TetherConfig::default());
        let a = registry.guard("gemini");
        let b = registry.guard("gemini");
        assert!(Arc::ptr_eq(&a, &b));
        registry.guard("anthropic");
        assert_eq!(registry.names(), vec!["anthropic", "gemini"]);
        assert_eq!(registry.status().len(), 2);
    }
}
