//! Per-tool call counters and timings

use crate::util::truncate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Per-tool call counters.
///
/// Counters are atomics so concurrent calls never lose an increment;
/// timestamps and the last error sit behind a small lock.
#[derive(Debug, Default)]
pub struct ToolMetrics {
    call_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    total_duration_us: AtomicU64,
    last: Mutex<LastSeen>,
}

#[derive(Debug, Default, Clone)]
struct LastSeen {
    call_at: Option<DateTime<Utc>>,
    error: Option<String>,
    error_at: Option<DateTime<Utc>>,
}

/// Read-only view with derived fields computed on read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetricsSnapshot {
    pub call_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Rounded to two decimals
    pub avg_duration_ms: f64,
    /// Rounded to two decimals
    pub total_duration_ms: f64,
    /// Formatted like `"75.0%"`
    pub success_rate: String,
    pub last_call_at: Option<DateTime<Utc>>,
    /// At most 100 characters
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ToolMetrics {
    fn last(&self) -> MutexGuard<'_, LastSeen> {
        self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn record_start(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.last().call_at = Some(Utc::now());
    }

    pub(crate) fn record_success(&self, elapsed: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.add_duration(elapsed);
    }

    pub(crate) fn record_error(&self, elapsed: Duration, message: &str) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.add_duration(elapsed);
        let mut last = self.last();
        last.error = Some(message.to_string());
        last.error_at = Some(Utc::now());
    }

    fn add_duration(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_duration_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Sum of call durations in milliseconds
    pub fn total_duration_ms(&self) -> f64 {
        self.total_duration_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Mean call duration in milliseconds, 0 before the first call
    pub fn avg_duration_ms(&self) -> f64 {
        match self.call_count() {
            0 => 0.0,
            calls => self.total_duration_ms() / calls as f64,
        }
    }

    /// Fraction of calls that succeeded, 0 before the first call
    pub fn success_rate(&self) -> f64 {
        match self.call_count() {
            0 => 0.0,
            calls => self.success_count() as f64 / calls as f64,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last().error.clone()
    }

    pub fn snapshot(&self) -> ToolMetricsSnapshot {
        let last = self.last().clone();
        ToolMetricsSnapshot {
            call_count: self.call_count(),
            success_count: self.success_count(),
            error_count: self.error_count(),
            avg_duration_ms: round2(self.avg_duration_ms()),
            total_duration_ms: round2(self.total_duration_ms()),
            success_rate: format!("{:.1}%", self.success_rate() * 100.0),
            last_call_at: last.call_at,
            last_error: last.error.map(|e| truncate(&e, 100)),
            last_error_at: last.error_at,
        }
    }

    /// Zero every counter and clear timestamps
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.total_duration_us.store(0, Ordering::Relaxed);
        *self.last() = LastSeen::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_calls() {
        let metrics = ToolMetrics::default();
        assert_eq!(metrics.avg_duration_ms(), 0.0);
        assert_eq!(metrics.success_rate(), 0.0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.success_rate, "0.0%");
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn test_snapshot_rounding_and_rate() {
        let metrics = ToolMetrics::default();
        for _ in 0..3 {
            metrics.record_start();
            metrics.record_success(Duration::from_micros(33_374));
        }
        metrics.record_start();
        metrics.record_error(Duration::from_micros(0), &"x".repeat(200));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.call_count, 4);
        assert_eq!(snapshot.success_rate, "75.0%");
        assert_eq!(snapshot.total_duration_ms, 100.12);
        assert_eq!(snapshot.avg_duration_ms, 25.03);
        assert_eq!(snapshot.last_error.as_deref().map(str::len), Some(100));
        assert!(snapshot.last_error_at.is_some());
    }

    #[test]
    fn test_reset() {
        let metrics = ToolMetrics::default();
        metrics.record_start();
        metrics.record_error(Duration::from_millis(5), "boom");
        metrics.reset();
        assert_eq!(metrics.call_count(), 0);
        assert_eq!(metrics.error_count(), 0);
        assert!(metrics.last_error().is_none());
    }
}
