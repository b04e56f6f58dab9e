//! Task registry for long-running indexing jobs
//!
//! A single-process map from opaque task ids to task state. Observers
//! subscribe through a bounded broadcast channel per task: a new subscriber
//! gets the current snapshot plus every subsequent event until a terminal
//! state. Progress is monotonically non-decreasing per task.

use crate::error::{Result, TrawlError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Opaque task identifier (UUID v4)
pub type TaskId = String;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub state: TaskState,
    pub progress: f32,
    pub stage: String,
    pub message: String,
    pub statistics: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Event emitted on a task's channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress {
        task_id: TaskId,
        progress: f32,
        stage: String,
        message: String,
        elapsed_sec: f64,
    },
    Complete {
        task_id: TaskId,
        statistics: serde_json::Value,
    },
    Error {
        task_id: TaskId,
        error: String,
    },
}

/// Cooperative cancellation signal checked at stage and batch boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TrawlError::Cancelled)
        } else {
            Ok(())
        }
    }
}

struct TaskEntry {
    snapshot: TaskSnapshot,
    events: broadcast::Sender<TaskEvent>,
    cancel: CancelToken,
    started: Instant,
}

/// Thread-safe registry of all tasks in this process
///
/// Terminal tasks are retained until process exit so late pollers still see
/// the outcome.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending task
    pub fn create(&self) -> (TaskId, CancelToken) {
        let task_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancelToken::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let entry = TaskEntry {
            snapshot: TaskSnapshot {
                task_id: task_id.clone(),
                state: TaskState::Pending,
                progress: 0.0,
                stage: "pending".to_string(),
                message: "Waiting to start".to_string(),
                statistics: None,
                error: None,
            },
            events,
            cancel: cancel.clone(),
            started: Instant::now(),
        };

        self.tasks.write().unwrap().insert(task_id.clone(), entry);
        (task_id, cancel)
    }

    /// Record progress; values are clamped so the sequence never decreases
    pub fn update(&self, task_id: &str, progress: f32, stage: &str, message: &str) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TrawlError::TaskNotFound(task_id.to_string()))?;

        let progress = progress.clamp(0.0, 100.0).max(entry.snapshot.progress);
        entry.snapshot.state = TaskState::Running;
        entry.snapshot.progress = progress;
        entry.snapshot.stage = stage.to_string();
        entry.snapshot.message = message.to_string();

        let event = TaskEvent::Progress {
            task_id: task_id.to_string(),
            progress,
            stage: stage.to_string(),
            message: message.to_string(),
            elapsed_sec: entry.started.elapsed().as_secs_f64(),
        };
        let _ = entry.events.send(event);
        Ok(())
    }

    /// Transition to `completed` with final statistics
    pub fn complete(&self, task_id: &str, statistics: serde_json::Value) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TrawlError::TaskNotFound(task_id.to_string()))?;

        entry.snapshot.state = TaskState::Completed;
        entry.snapshot.progress = 100.0;
        entry.snapshot.stage = "completed".to_string();
        entry.snapshot.statistics = Some(statistics.clone());

        let _ = entry.events.send(TaskEvent::Complete {
            task_id: task_id.to_string(),
            statistics,
        });
        Ok(())
    }

    /// Transition to `failed`, retaining the error
    pub fn fail(&self, task_id: &str, error: &str) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TrawlError::TaskNotFound(task_id.to_string()))?;

        entry.snapshot.state = TaskState::Failed;
        entry.snapshot.error = Some(error.to_string());
        entry.snapshot.message = error.to_string();

        let _ = entry.events.send(TaskEvent::Error {
            task_id: task_id.to_string(),
            error: error.to_string(),
        });
        Ok(())
    }

    /// Request cancellation; the task transitions to `failed` at its next
    /// boundary check
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let tasks = self.tasks.read().unwrap();
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| TrawlError::TaskNotFound(task_id.to_string()))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Current snapshot of a task
    pub fn get(&self, task_id: &str) -> Result<TaskSnapshot> {
        let tasks = self.tasks.read().unwrap();
        tasks
            .get(task_id)
            .map(|e| e.snapshot.clone())
            .ok_or_else(|| TrawlError::TaskNotFound(task_id.to_string()))
    }

    /// Subscribe to a task: returns the current snapshot plus a receiver for
    /// all subsequent events
    pub fn subscribe(
        &self,
        task_id: &str,
    ) -> Result<(TaskSnapshot, broadcast::Receiver<TaskEvent>)> {
        let tasks = self.tasks.read().unwrap();
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| TrawlError::TaskNotFound(task_id.to_string()))?;
        Ok((entry.snapshot.clone(), entry.events.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let registry = TaskRegistry::new();
        let (task_id, _cancel) = registry.create();

        let snapshot = registry.get(&task_id).unwrap();
        assert_eq!(snapshot.state, TaskState::Pending);
        assert_eq!(snapshot.progress, 0.0);

        assert!(matches!(
            registry.get("missing"),
            Err(TrawlError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let registry = TaskRegistry::new();
        let (task_id, _cancel) = registry.create();

        registry.update(&task_id, 40.0, "encoding", "messages").unwrap();
        // A lower value must not move progress backwards
        registry.update(&task_id, 25.0, "encoding", "still going").unwrap();

        let snapshot = registry.get(&task_id).unwrap();
        assert_eq!(snapshot.progress, 40.0);
        assert_eq!(snapshot.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_subscribe_receives_snapshot_and_events() {
        let registry = TaskRegistry::new();
        let (task_id, _cancel) = registry.create();

        registry.update(&task_id, 30.0, "chunking", "windows").unwrap();

        let (snapshot, mut rx) = registry.subscribe(&task_id).unwrap();
        assert_eq!(snapshot.progress, 30.0);

        registry.update(&task_id, 80.0, "storage", "writing").unwrap();
        registry
            .complete(&task_id, serde_json::json!({"messages_indexed": 3}))
            .unwrap();

        match rx.recv().await.unwrap() {
            TaskEvent::Progress { progress, stage, .. } => {
                assert_eq!(progress, 80.0);
                assert_eq!(stage, "storage");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            TaskEvent::Complete { statistics, .. } => {
                assert_eq!(statistics["messages_indexed"], 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fail_retains_error() {
        let registry = TaskRegistry::new();
        let (task_id, _cancel) = registry.create();

        registry.fail(&task_id, "encoder exploded").unwrap();

        let snapshot = registry.get(&task_id).unwrap();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("encoder exploded"));
        assert!(snapshot.state.is_terminal());
    }

    #[test]
    fn test_cancel_token() {
        let registry = TaskRegistry::new();
        let (task_id, cancel) = registry.create();

        assert!(cancel.check().is_ok());
        registry.cancel(&task_id).unwrap();
        assert!(cancel.is_cancelled());
        assert!(matches!(cancel.check(), Err(TrawlError::Cancelled)));
    }

    #[test]
    fn test_progress_event_serialization() {
        let event = TaskEvent::Progress {
            task_id: "t1".to_string(),
            progress: 42.0,
            stage: "encoding".to_string(),
            message: "batch 3/10".to_string(),
            elapsed_sec: 1.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["progress"], 42.0);
        assert_eq!(json["stage"], "encoding");
        assert_eq!(json["elapsed_sec"], 1.5);
    }
}
