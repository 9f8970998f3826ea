use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{FinalStatus, HostOutcome, TaskId};

/// Lifecycle events emitted by the host automation engine.
///
/// Serialized as an internally tagged object, e.g.
/// `{"event": "task_start", "task_id": "t1", "name": "Install pkg"}`.
/// Anything the engine attaches to a host result lives untyped in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RunStart {
        #[serde(default)]
        name: Option<String>,
        /// Dry run: tasks report what they would change.
        #[serde(default)]
        check_mode: bool,
    },
    TaskQueued {
        task_id: TaskId,
        name: String,
    },
    TaskStart {
        task_id: TaskId,
        name: String,
        /// Section the task belongs to, printed as a header when it changes.
        #[serde(default)]
        group: Option<String>,
    },
    TaskHostResult {
        task_id: TaskId,
        host: String,
        #[serde(default)]
        payload: Value,
        outcome: HostOutcome,
        /// The payload must not be shown unless verbosity is high.
        #[serde(default)]
        no_log: bool,
    },
    /// A host failed an attempt and the task will be tried again.
    TaskRetry {
        task_id: TaskId,
        host: String,
        retries_left: u32,
    },
    TaskEnd {
        task_id: TaskId,
        status: FinalStatus,
    },
    RunEnd,
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::RunStart { .. } => "run_start",
            LifecycleEvent::TaskQueued { .. } => "task_queued",
            LifecycleEvent::TaskStart { .. } => "task_start",
            LifecycleEvent::TaskHostResult { .. } => "task_host_result",
            LifecycleEvent::TaskRetry { .. } => "task_retry",
            LifecycleEvent::TaskEnd { .. } => "task_end",
            LifecycleEvent::RunEnd => "run_end",
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            LifecycleEvent::TaskQueued { task_id, .. }
            | LifecycleEvent::TaskStart { task_id, .. }
            | LifecycleEvent::TaskHostResult { task_id, .. }
            | LifecycleEvent::TaskRetry { task_id, .. }
            | LifecycleEvent::TaskEnd { task_id, .. } => Some(task_id),
            LifecycleEvent::RunStart { .. } | LifecycleEvent::RunEnd => None,
        }
    }
}
