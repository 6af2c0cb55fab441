//! Latency-aware timeout estimation for upstream calls

use crate::config::TimeoutSettings;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Number of recent latencies kept
pub const LATENCY_WINDOW: usize = 10;

const LATENCY_SCALE_SECS: f64 = 30.0;
const MAX_LATENCY_FACTOR: f64 = 2.0;

/// Computes the next call deadline from tool count and recent latency.
///
/// The output is advisory: callers feed it into their own timeout mechanism.
#[derive(Debug)]
pub struct AdaptiveTimeout {
    settings: TimeoutSettings,
    latencies: Mutex<VecDeque<f64>>,
}

impl Default for AdaptiveTimeout {
    fn default() -> Self {
        Self::new(TimeoutSettings::default())
    }
}

impl AdaptiveTimeout {
    pub fn new(settings: TimeoutSettings) -> Self {
        Self {
            settings,
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    fn window(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.latencies.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the duration of a successful call
    pub fn record_latency(&self, latency: Duration) {
        let mut window = self.window();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_secs_f64());
    }

    /// Mean of the recorded latencies, if any
    pub fn average_latency(&self) -> Option<Duration> {
        let window = self.window();
        if window.is_empty() {
            return None;
        }
        let avg = window.iter().sum::<f64>() / window.len() as f64;
        Some(Duration::from_secs_f64(avg.max(0.0)))
    }

    /// Number of latencies currently in the window
    pub fn samples(&self) -> usize {
        self.window().len()
    }

    /// Highest value [`calculate`](Self::calculate) can return, in seconds
    pub fn ceiling_secs(&self) -> u64 {
        self.settings
            .api_call
            .saturating_sub(self.settings.safety_margin)
            .as_secs()
    }

    /// Timeout in whole seconds for the next call
    pub fn calculate(&self, tool_count: usize, is_first_chunk: bool) -> u64 {
        if !is_first_chunk {
            return self.settings.stream_chunk.as_secs();
        }

        let base = self.settings.first_chunk_base.as_secs_f64();
        let count = tool_count as f64;
        let tool_term = if tool_count <= 10 {
            count * 2.0
        } else if tool_count <= 20 {
            20.0 + (count - 10.0) * 3.0
        } else {
            50.0 + (count - 20.0) * 4.0
        };

        let latency_factor = self
            .average_latency()
            .map(|avg| (1.0 + avg.as_secs_f64() / LATENCY_SCALE_SECS).min(MAX_LATENCY_FACTOR))
            .unwrap_or(1.0);

        let timeout = ((base + tool_term) * latency_factor) as u64;
        timeout.min(self.ceiling_secs())
    }

    /// [`calculate`](Self::calculate) as a `Duration`
    pub fn deadline(&self, tool_count: usize, is_first_chunk: bool) -> Duration {
        Duration::from_secs(self.calculate(tool_count, is_first_chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_uses_unit_factor() {
        let timeout = AdaptiveTimeout::default();
        assert_eq!(timeout.calculate(0, true), 100);
        assert_eq!(timeout.calculate(5, true), 110);
        assert_eq!(timeout.calculate(15, true), 135);
        assert_eq!(timeout.calculate(25, true), 170);
    }

    #[test]
    fn test_subsequent_chunks_use_fixed_timeout() {
        let timeout = AdaptiveTimeout::default();
        timeout.record_latency(Duration::from_secs(25));
        assert_eq!(timeout.calculate(50, false), 60);
    }

    #[test]
    fn test_latency_factor_scales_and_caps() {
        let timeout = AdaptiveTimeout::default();
        timeout.record_latency(Duration::from_secs(3));
        // factor 1.1: (100 + 0) * 1.1
        assert_eq!(timeout.calculate(0, true), 110);

        for _ in 0..LATENCY_WINDOW {
            timeout.record_latency(Duration::from_secs(120));
        }
        assert_eq!(timeout.samples(), LATENCY_WINDOW);
        // factor capped at 2.0, result capped at 170
        assert_eq!(timeout.calculate(0, true), 170);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let timeout = AdaptiveTimeout::default();
        timeout.record_latency(Duration::from_secs(100));
        for _ in 0..LATENCY_WINDOW {
            timeout.record_latency(Duration::from_secs(3));
        }
        assert_eq!(timeout.average_latency(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_monotonic_in_tool_count_and_bounded() {
        let timeout = AdaptiveTimeout::default();
        timeout.record_latency(Duration::from_secs(12));
        let mut previous = 0;
        for count in 0..100 {
            let value = timeout.calculate(count, true);
            assert!(value >= previous);
            assert!(value <= timeout.ceiling_secs());
            previous = value;
        }
    }
}
