//! Circuit Breaker Pattern
//!
//! Tracks consecutive upstream failures and rejects calls for a
//! category-dependent cooldown once the threshold is reached. The breaker
//! never sleeps: [`CircuitBreaker::can_proceed`] only answers yes or no, and
//! [`CircuitBreaker::remaining_cooldown`] tells the caller how long to wait.

use super::classify::ErrorCategory;
use crate::config::CircuitSettings;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit open - requests are rejected
    Open,
    /// One trial request is allowed through
    HalfOpen,
}

impl CircuitSettings {
    /// Cooldown applied when a failure of `category` opens the circuit
    pub fn cooldown_for(&self, category: ErrorCategory) -> Duration {
        match category {
            ErrorCategory::RateLimit => self.rate_limit_cooldown,
            ErrorCategory::ServerError => self.server_error_cooldown,
            ErrorCategory::Timeout => self.timeout_cooldown,
            ErrorCategory::Ssl | ErrorCategory::Unknown => self.default_cooldown,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: usize,
    cooldown: Duration,
    open_until: Option<Instant>,
    probe_started: Option<Instant>,
}

/// Per-upstream circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named upstream
    pub fn new(name: impl Into<String>, settings: CircuitSettings) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                cooldown: settings.default_cooldown,
                open_until: None,
                probe_started: None,
            }),
            settings,
        }
    }

    /// Upstream name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, without performing any transition
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures since the last success
    pub fn failure_count(&self) -> usize {
        self.lock().failure_count
    }

    /// Whether a call may go upstream now.
    ///
    /// The first caller after the cooldown moves the circuit to half-open and
    /// receives the single trial slot. Further callers are rejected until the
    /// trial reports back, or until another cooldown passes without a report.
    pub fn can_proceed(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.open_until.is_none_or(|until| now >= until);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(now);
                    tracing::info!(upstream = %self.name, "circuit breaker half-open");
                }
                elapsed
            }
            CircuitState::HalfOpen => {
                let stale = inner
                    .probe_started
                    .is_none_or(|started| now >= started + inner.cooldown);
                if stale {
                    inner.probe_started = Some(now);
                    tracing::debug!(upstream = %self.name, "half-open trial slot reissued");
                }
                stale
            }
        }
    }

    /// Whole seconds until the circuit allows a trial call, 0 unless open
    pub fn remaining_cooldown(&self) -> u64 {
        let inner = self.lock();
        match (inner.state, inner.open_until) {
            (CircuitState::Open, Some(until)) => {
                until.saturating_duration_since(Instant::now()).as_secs()
            }
            _ => 0,
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.open_until = None;
            inner.probe_started = None;
            tracing::info!(upstream = %self.name, "circuit breaker closed");
        }
    }

    /// Record a failed call of the given category
    pub fn record_failure(&self, category: ErrorCategory) {
        let now = Instant::now();
        let mut inner = self.lock();

        inner.failure_count += 1;
        inner.cooldown = self.settings.cooldown_for(category);

        if inner.failure_count >= self.settings.failure_threshold {
            inner.state = CircuitState::Open;
            inner.open_until = Some(now + inner.cooldown);
            inner.probe_started = None;
            tracing::warn!(
                upstream = %self.name,
                error_type = %category,
                cooldown_s = inner.cooldown.as_secs(),
                failures = inner.failure_count,
                "circuit breaker opened"
            );
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.open_until = None;
        inner.probe_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitSettings::default())
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker();

        for _ in 0..4 {
            cb.record_failure(ErrorCategory::ServerError);
            assert!(cb.can_proceed());
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure(ErrorCategory::ServerError);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure(ErrorCategory::Unknown);
        }
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        for _ in 0..4 {
            cb.record_failure(ErrorCategory::Unknown);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_trial_then_close() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure(ErrorCategory::Timeout);
        }

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // trial slot already taken
        assert!(!cb.can_proceed());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_cooldown() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure(ErrorCategory::Timeout);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_proceed());

        cb.record_failure(ErrorCategory::RateLimit);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure(ErrorCategory::Unknown);
        }
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.can_proceed());
    }

    #[test]
    fn test_cooldown_for_category() {
        let settings = CircuitSettings::default();
        assert_eq!(settings.cooldown_for(ErrorCategory::RateLimit), Duration::from_secs(300));
        assert_eq!(settings.cooldown_for(ErrorCategory::ServerError), Duration::from_secs(60));
        assert_eq!(settings.cooldown_for(ErrorCategory::Ssl), Duration::from_secs(30));
    }
}
