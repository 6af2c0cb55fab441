//! Sliding-window error rate monitoring with alert cooldowns

use crate::config::MonitorSettings;
use crate::error::{Result, TetherError};
use crate::util::truncate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Structured alert handed to every [`AlertSink`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub error_type: String,
    pub count: u32,
    pub window_secs: u64,
    pub threshold: u32,
    pub details: String,
    pub fired_at: DateTime<Utc>,
}

/// Destination for threshold alerts
///
/// Delivery runs on a detached task; a returned error is logged and
/// never reaches the code path that reported the original failure.
#[async_trait]
pub trait AlertSink: Send + Sync + fmt::Debug {
    async fn send(&self, alert: &AlertPayload) -> Result<()>;
}

/// Posts a Discord-style embed to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn body(alert: &AlertPayload) -> serde_json::Value {
        let details = if alert.details.is_empty() {
            "N/A".to_string()
        } else {
            truncate(&alert.details, 500)
        };

        json!({
            "embeds": [{
                "title": format!("Tether Alert: {}", alert.error_type.to_uppercase()),
                "color": 0xFF0000,
                "fields": [
                    {"name": "Error Type", "value": alert.error_type, "inline": true},
                    {"name": "Count", "value": alert.count.to_string(), "inline": true},
                    {"name": "Window", "value": format!("{}s", alert.window_secs), "inline": true},
                    {"name": "Details", "value": details, "inline": false},
                ],
                "footer": {"text": format!("Tether - {}", alert.fired_at.format("%Y-%m-%d %H:%M:%S"))},
            }]
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::body(alert))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(error_type = %alert.error_type, "webhook alert sent");
            Ok(())
        } else {
            Err(TetherError::Remote(format!(
                "webhook returned HTTP {}",
                status.as_u16()
            )))
        }
    }
}

/// Live view of one error type's window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorWindowStats {
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub threshold: u32,
}

#[derive(Debug)]
struct Counter {
    count: u32,
    window_start: Instant,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, Counter>,
    last_alert: HashMap<String, Instant>,
}

/// Per-type sliding-window error counters with threshold alerts
#[derive(Debug)]
pub struct ErrorMonitor {
    window: Duration,
    alert_cooldown: Duration,
    default_threshold: u32,
    thresholds: HashMap<String, u32>,
    sinks: Vec<Arc<dyn AlertSink>>,
    state: Mutex<State>,
}

impl Default for ErrorMonitor {
    fn default() -> Self {
        Self::new(&MonitorSettings::default())
    }
}

impl ErrorMonitor {
    /// Monitor without external sinks; alerts are only logged
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            window: settings.window,
            alert_cooldown: settings.alert_cooldown,
            default_threshold: settings.default_threshold,
            thresholds: settings.thresholds.clone(),
            sinks: Vec::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Monitor with a webhook sink when `webhook_url` is configured
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        let monitor = Self::new(settings);
        match &settings.webhook_url {
            Some(url) => monitor.with_sink(Arc::new(WebhookAlertSink::new(url.clone()))),
            None => monitor,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Threshold for `error_type`
    pub fn threshold(&self, error_type: &str) -> u32 {
        self.thresholds
            .get(error_type)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one occurrence of `error_type`. Returns true when this call fired an alert.
    pub fn record(&self, error_type: &str, details: &str) -> bool {
        let now = Instant::now();
        let wall = Utc::now();
        let threshold = self.threshold(error_type);

        let alert = {
            let mut state = self.lock();
            let counter = state
                .counters
                .entry(error_type.to_string())
                .or_insert_with(|| Counter {
                    count: 0,
                    window_start: now,
                    first_seen: wall,
                    last_seen: wall,
                });

            if now.duration_since(counter.window_start) > self.window {
                counter.count = 0;
                counter.window_start = now;
                counter.first_seen = wall;
            }
            counter.count += 1;
            counter.last_seen = wall;
            let count = counter.count;

            tracing::debug!(error_type, count, window_secs = self.window.as_secs(), "error recorded");

            if count < threshold {
                return false;
            }

            if let Some(last) = state.last_alert.get(error_type) {
                let since = now.duration_since(*last);
                if since < self.alert_cooldown {
                    tracing::debug!(
                        error_type,
                        cooldown_remaining_s = (self.alert_cooldown - since).as_secs(),
                        "alert suppressed (cooldown)"
                    );
                    return false;
                }
            }
            state.last_alert.insert(error_type.to_string(), now);

            AlertPayload {
                error_type: error_type.to_string(),
                count,
                window_secs: self.window.as_secs(),
                threshold,
                details: truncate(details, 200),
                fired_at: wall,
            }
        };

        tracing::error!(
            error_type = %alert.error_type,
            count = alert.count,
            window_secs = alert.window_secs,
            threshold = alert.threshold,
            details = %alert.details,
            "error threshold exceeded"
        );

        self.dispatch(alert);
        true
    }

    fn dispatch(&self, alert: AlertPayload) {
        if self.sinks.is_empty() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!(error_type = %alert.error_type, "alert dispatch skipped (no runtime)");
                return;
            }
        };

        let alert = Arc::new(alert);
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let alert = Arc::clone(&alert);
            handle.spawn(async move {
                if let Err(e) = sink.send(&alert).await {
                    tracing::error!(error_type = %alert.error_type, error = %e, "alert dispatch failed");
                }
            });
        }
    }

    /// Windows that have not yet expired
    pub fn stats(&self) -> BTreeMap<String, ErrorWindowStats> {
        let now = Instant::now();
        self.lock()
            .counters
            .iter()
            .filter(|(_, counter)| now.duration_since(counter.window_start) <= self.window)
            .map(|(error_type, counter)| {
                (
                    error_type.clone(),
                    ErrorWindowStats {
                        count: counter.count,
                        first_seen: counter.first_seen,
                        last_seen: counter.last_seen,
                        threshold: self.threshold(error_type),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<AlertPayload>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, alert: &AlertPayload) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn send(&self, _alert: &AlertPayload) -> Result<()> {
            Err(TetherError::Remote("sink down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_fires_once_within_cooldown() {
        let monitor = ErrorMonitor::default();

        assert!(!monitor.record("503", "a"));
        assert!(!monitor.record("503", "b"));
        assert!(monitor.record("503", "c"));
        // still over threshold, suppressed by cooldown
        assert!(!monitor.record("503", "d"));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(!monitor.record("503", "e"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_expiry() {
        let monitor = ErrorMonitor::default();
        monitor.record("timeout", "");
        monitor.record("timeout", "");
        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(monitor.stats().is_empty());
        monitor.record("timeout", "");
        assert_eq!(monitor.stats()["timeout"].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_again_after_cooldown() {
        let monitor = ErrorMonitor::default();
        for _ in 0..3 {
            monitor.record("503", "");
        }
        tokio::time::advance(Duration::from_secs(601)).await;
        // window expired: counting restarts
        assert!(!monitor.record("503", ""));
        assert!(!monitor.record("503", ""));
        assert!(monitor.record("503", ""));
    }

    #[test]
    fn test_default_threshold() {
        let monitor = ErrorMonitor::default();
        assert_eq!(monitor.threshold("503"), 3);
        assert_eq!(monitor.threshold("ssl"), 10);
    }

    #[test]
    fn test_record_without_runtime_does_not_panic() {
        let monitor = ErrorMonitor::default().with_sink(Arc::new(RecordingSink::default()));
        for _ in 0..3 {
            monitor.record("503", "x");
        }
    }

    #[tokio::test]
    async fn test_sink_receives_payload() {
        let sink = Arc::new(RecordingSink::default());
        let monitor = ErrorMonitor::default().with_sink(sink.clone());

        for _ in 0..5 {
            monitor.record("429", "quota");
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].error_type, "429");
        assert_eq!(alerts[0].count, 5);
        assert_eq!(alerts[0].threshold, 5);
        assert_eq!(alerts[0].window_secs, 300);
    }

    #[tokio::test]
    async fn test_failing_sink_is_contained() {
        let monitor = ErrorMonitor::default().with_sink(Arc::new(FailingSink));
        for _ in 0..3 {
            monitor.record("503", "x");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.stats()["503"].count, 3);
    }

    #[tokio::test]
    async fn test_webhook_sink_posts_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "embeds": [{"title": "Tether Alert: 503"}]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookAlertSink::new(format!("{}/hook", server.uri()));
        let alert = AlertPayload {
            error_type: "503".to_string(),
            count: 3,
            window_secs: 300,
            threshold: 3,
            details: String::new(),
            fired_at: Utc::now(),
        };
        sink.send(&alert).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_sink_reports_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = WebhookAlertSink::new(server.uri());
        let alert = AlertPayload {
            error_type: "timeout".to_string(),
            count: 5,
            window_secs: 300,
            threshold: 5,
            details: "slow".to_string(),
            fired_at: Utc::now(),
        };
        let err = sink.send(&alert).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }
}
