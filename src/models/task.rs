use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier of one task invocation within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Skipped,
    Unreachable,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Ok => "ok",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Unreachable => "unreachable",
        }
    }
}

/// Status a `task_end` event may carry. Only terminal states are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Ok,
    Failed,
    Skipped,
    Unreachable,
}

impl From<FinalStatus> for TaskStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Ok => TaskStatus::Ok,
            FinalStatus::Failed => TaskStatus::Failed,
            FinalStatus::Skipped => TaskStatus::Skipped,
            FinalStatus::Unreachable => TaskStatus::Unreachable,
        }
    }
}

/// Outcome of a task on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOutcome {
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
}

impl HostOutcome {
    pub fn is_failure(self) -> bool {
        matches!(self, HostOutcome::Failed | HostOutcome::Unreachable)
    }

    pub fn label(self) -> &'static str {
        match self {
            HostOutcome::Ok => "ok",
            HostOutcome::Changed => "changed",
            HostOutcome::Failed => "failed",
            HostOutcome::Skipped => "skipped",
            HostOutcome::Unreachable => "unreachable",
        }
    }
}

/// One per-host result. Immutable once appended to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct HostResult {
    pub host: String,
    pub payload: Value,
    pub outcome: HostOutcome,
    pub received_at: DateTime<Local>,
    /// Time between the task starting and this result arriving.
    pub elapsed: Duration,
    pub no_log: bool,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub group: Option<String>,
    pub status: TaskStatus,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    pub finished_clock: Option<DateTime<Local>>,
    pub host_results: Vec<Arc<HostResult>>,
}

impl TaskRecord {
    pub fn pending(id: TaskId, name: String) -> Self {
        Self {
            id,
            name,
            group: None,
            status: TaskStatus::Pending,
            started_at: None,
            ended_at: None,
            finished_clock: None,
            host_results: vec![],
        }
    }

    pub fn running(id: TaskId, name: String, now: Instant) -> Self {
        let mut record = Self::pending(id, name);
        record.status = TaskStatus::Running;
        record.started_at = Some(now);
        record
    }

    /// Elapsed time as of `now`. Never cached: running tasks are measured against
    /// the caller's clock, finished tasks against their end time.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => now.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// `ended_at` iff terminal, `started_at` iff running or terminal.
    pub fn is_consistent(&self) -> bool {
        let ended_ok = self.ended_at.is_some() == self.status.is_terminal();
        let started_ok = self.started_at.is_some() == (self.status != TaskStatus::Pending);
        ended_ok && started_ok
    }
}
