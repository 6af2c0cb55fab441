//! Sliding-window error-rate monitoring with external alerting

mod error_monitor;

pub use error_monitor::{
    AlertPayload, AlertSink, ErrorMonitor, ErrorWindowStats, WebhookAlertSink,
};
