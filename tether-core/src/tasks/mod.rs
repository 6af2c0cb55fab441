//! Lifecycle and progress tracking for long-running background operations

mod tracker;

pub use tracker::{TaskStatus, TaskSummary, TaskTracker, TaskView, TrackedTask};
