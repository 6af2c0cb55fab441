//! Background task table with progress and bounded retention

use crate::config::TaskSettings;
use crate::error::{Result, TetherError};
use crate::util::truncate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not started
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with error
    Failed,
    /// Cancelled before finishing
    Cancelled,
}

impl TaskStatus {
    /// Pending or running
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Completed, failed or cancelled
    pub fn is_finished(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// A tracked background operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTask {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0.0 ..= 1.0
    pub progress: f64,
    pub progress_message: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    created_seq: u64,
    #[serde(skip)]
    finished_seq: Option<u64>,
}

impl TrackedTask {
    /// Seconds between start and completion (or now, while running)
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    /// Serializable view without the result payload
    pub fn to_view(&self) -> TaskView {
        TaskView {
            task_id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress,
            progress_message: self.progress_message.clone(),
            duration_seconds: self.duration_seconds(),
            has_result: self.result.is_some(),
            error: self.error.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// JSON shape reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub progress_message: String,
    pub duration_seconds: Option<f64>,
    pub has_result: bool,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Counts by status plus the active tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub active: Vec<TaskView>,
}

#[derive(Debug, Default)]
struct Table {
    tasks: HashMap<String, TrackedTask>,
    seq: u64,
}

impl Table {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut TrackedTask> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| TetherError::Task(format!("Unknown task: '{}'", id)))
    }

    /// Drop the finished task that finished first, if any
    fn evict_oldest_finished(&mut self) -> Option<String> {
        let (_, evicted) = self
            .tasks
            .values()
            .filter_map(|t| t.finished_seq.map(|seq| (seq, t.id.clone())))
            .min()?;
        self.tasks.remove(&evicted);
        tracing::debug!(task_id = %evicted, "evicted finished task");
        Some(evicted)
    }
}

/// Task table guarded by a single lock.
///
/// Over capacity, each `create` evicts the oldest finished task (by
/// completion order). Pending and running tasks are never evicted, so the
/// table may stay above capacity while they are outstanding.
///
/// Since `create` removes at most one task, a burst of concurrent tasks
/// leaves the table at its high-water mark after they finish. Call
/// [`prune`](TaskTracker::prune) to bring it back down to capacity.
#[derive(Debug)]
pub struct TaskTracker {
    capacity: usize,
    table: Mutex<Table>,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::from_settings(&TaskSettings::default())
    }
}

impl TaskTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            table: Mutex::new(Table::default()),
        }
    }

    pub fn from_settings(settings: &TaskSettings) -> Self {
        Self::new(settings.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a pending task and return its 8-character id
    pub fn create(&self, name: impl Into<String>, metadata: Option<Map<String, Value>>) -> String {
        let name = name.into();
        let mut table = self.lock();

        let id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if !table.tasks.contains_key(&candidate) {
                break candidate;
            }
        };

        let created_seq = table.next_seq();
        table.tasks.insert(
            id.clone(),
            TrackedTask {
                id: id.clone(),
                name: name.clone(),
                status: TaskStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                progress: 0.0,
                progress_message: String::new(),
                result: None,
                error: None,
                metadata: metadata.unwrap_or_default(),
                created_seq,
                finished_seq: None,
            },
        );

        if table.tasks.len() > self.capacity {
            table.evict_oldest_finished();
        }

        tracing::debug!(task_id = %id, name = %name, "task created");
        id
    }

    /// Evict finished tasks, oldest first, until the table fits its capacity.
    /// Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut table = self.lock();
        let mut removed = 0;
        while table.tasks.len() > self.capacity && table.evict_oldest_finished().is_some() {
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, remaining = table.tasks.len(), "pruned finished tasks");
        }
        removed
    }

    /// Mark a task running
    pub fn start(&self, id: &str) -> Result<()> {
        let mut table = self.lock();
        let task = table.task_mut(id)?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        tracing::debug!(task_id = %id, "task started");
        Ok(())
    }

    /// Update progress (clamped to 0..=1); a pending task becomes running
    pub fn update_progress(&self, id: &str, progress: f64, message: impl Into<String>) -> Result<()> {
        let mut table = self.lock();
        let task = table.task_mut(id)?;
        task.progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        task.progress_message = message.into();
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark completed with an optional result
    pub fn complete(&self, id: &str, result: Option<Value>) -> Result<()> {
        let mut table = self.lock();
        let seq = table.next_seq();
        let task = table.task_mut(id)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.finished_seq = Some(seq);
        task.progress = 1.0;
        task.result = result;
        tracing::info!(
            task_id = %id,
            name = %task.name,
            duration_s = task.duration_seconds(),
            "task completed"
        );
        Ok(())
    }

    /// Mark failed with an error message
    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let mut table = self.lock();
        let seq = table.next_seq();
        let task = table.task_mut(id)?;
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.finished_seq = Some(seq);
        tracing::warn!(task_id = %id, name = %task.name, error = %truncate(&error, 100), "task failed");
        task.error = Some(error);
        Ok(())
    }

    /// Cancel a pending or running task. `Ok(false)` if it already finished.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let mut table = self.lock();
        let seq = table.next_seq();
        let task = table.task_mut(id)?;
        if !task.status.is_active() {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        task.finished_seq = Some(seq);
        tracing::info!(task_id = %id, name = %task.name, "task cancelled");
        Ok(true)
    }

    /// Snapshot of one task
    pub fn get(&self, id: &str) -> Option<TrackedTask> {
        self.lock().tasks.get(id).cloned()
    }

    /// View of one task
    pub fn view(&self, id: &str) -> Option<TaskView> {
        self.lock().tasks.get(id).map(TrackedTask::to_view)
    }

    /// Pending and running tasks, oldest first
    pub fn list_active(&self) -> Vec<TrackedTask> {
        let mut active: Vec<TrackedTask> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.created_seq);
        active
    }

    /// Most recently created tasks first
    pub fn list_recent(&self, limit: usize) -> Vec<TrackedTask> {
        let mut tasks: Vec<TrackedTask> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_seq.cmp(&a.created_seq));
        tasks.truncate(limit);
        tasks
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Totals by status plus views of active tasks
    pub fn summary(&self) -> TaskSummary {
        let table = self.lock();
        let mut by_status = BTreeMap::new();
        for task in table.tasks.values() {
            *by_status.entry(task.status).or_insert(0) += 1;
        }
        let mut active: Vec<&TrackedTask> =
            table.tasks.values().filter(|t| t.status.is_active()).collect();
        active.sort_by_key(|t| t.created_seq);

        TaskSummary {
            total: table.tasks.len(),
            by_status,
            active: active.into_iter().map(TrackedTask::to_view).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle() {
        let tracker = TaskTracker::default();
        let id = tracker.create("google_research", None);
        assert_eq!(id.len(), 8);
        assert_eq!(tracker.get(&id).unwrap().status, TaskStatus::Pending);

        tracker.start(&id).unwrap();
        tracker.update_progress(&id, 0.5, "halfway").unwrap();
        let task = tracker.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress_message, "halfway");

        tracker.complete(&id, Some(json!({"findings": []}))).unwrap();
        let view = tracker.view(&id).unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.progress, 1.0);
        assert!(view.has_result);
        assert!(view.duration_seconds.is_some());
    }

    #[test]
    fn test_progress_clamped_and_promotes_pending() {
        let tracker = TaskTracker::default();
        let id = tracker.create("job", None);
        tracker.update_progress(&id, 3.0, "").unwrap();
        let task = tracker.get(&id).unwrap();
        assert_eq!(task.progress, 1.0);
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        tracker.update_progress(&id, -1.0, "").unwrap();
        assert_eq!(tracker.get(&id).unwrap().progress, 0.0);
    }

    #[test]
    fn test_cancel_only_active() {
        let tracker = TaskTracker::default();
        let a = tracker.create("a", None);
        let b = tracker.create("b", None);
        tracker.fail(&b, "API error: rate limited").unwrap();

        assert!(tracker.cancel(&a).unwrap());
        assert!(!tracker.cancel(&b).unwrap());
        assert_eq!(tracker.get(&b).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_unknown_task() {
        let tracker = TaskTracker::default();
        assert!(tracker.start("missing").is_err());
        assert!(tracker.complete("missing", None).is_err());
        assert!(tracker.get("missing").is_none());
    }

    #[test]
    fn test_active_never_evicted() {
        let tracker = TaskTracker::new(1);
        let a = tracker.create("a", None);
        let b = tracker.create("b", None);
        let c = tracker.create("c", None);
        assert_eq!(tracker.len(), 3);
        for id in [&a, &b, &c] {
            assert!(tracker.get(id).is_some());
        }
    }

    #[test]
    fn test_prune_shrinks_after_burst() {
        let tracker = TaskTracker::new(2);
        let ids: Vec<String> = (0..5).map(|i| tracker.create(format!("job{i}"), None)).collect();
        assert_eq!(tracker.len(), 5);
        for id in &ids[..4] {
            tracker.complete(id, None).unwrap();
        }

        // one finished task goes per create, so the table stays high
        let late = tracker.create("late", None);
        assert_eq!(tracker.len(), 5);
        assert!(tracker.get(&ids[0]).is_none());

        // the two active tasks (ids[4], late) fill the capacity
        assert_eq!(tracker.prune(), 3);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.get(&ids[4]).is_some());
        assert!(tracker.get(&late).is_some());
        assert_eq!(tracker.prune(), 0);
    }

    #[test]
    fn test_list_recent_and_summary() {
        let tracker = TaskTracker::default();
        let first = tracker.create("first", None);
        let second = tracker.create("second", None);
        let third = tracker.create("third", None);
        tracker.complete(&first, None).unwrap();

        let recent: Vec<String> = tracker.list_recent(2).into_iter().map(|t| t.id).collect();
        assert_eq!(recent, vec![third.clone(), second.clone()]);

        let summary = tracker.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_status[&TaskStatus::Pending], 2);
        assert_eq!(summary.by_status[&TaskStatus::Completed], 1);
        assert_eq!(summary.active.len(), 2);
        assert_eq!(tracker.list_active().len(), 2);
    }

    #[test]
    fn test_view_serializes_status_lowercase() {
        let tracker = TaskTracker::default();
        let id = tracker.create("job", Some(Map::from_iter([("k".to_string(), json!(1))])));
        let value = serde_json::to_value(tracker.view(&id).unwrap()).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["has_result"], false);
        assert_eq!(value["metadata"]["k"], 1);
    }
}
