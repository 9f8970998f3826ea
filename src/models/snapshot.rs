use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Local};

use super::task::{HostOutcome, TaskRecord};

/// A finished task together with its position in the completion order.
#[derive(Debug, Clone)]
pub struct CompletedEntry {
    pub seq: u64,
    pub record: TaskRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    RunBanner {
        name: Option<String>,
        check_mode: bool,
    },
    Retry {
        task: String,
        group: Option<String>,
        host: String,
        retries_left: u32,
    },
}

/// A scrollback line that does not belong to a finished task. Shares the
/// completion sequence so both print in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub seq: u64,
    pub clock: DateTime<Local>,
    pub kind: NoticeKind,
}

/// Per-host outcome counts for the run recap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostTally {
    pub ok: u32,
    pub changed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub unreachable: u32,
}

impl HostTally {
    pub fn record(&mut self, outcome: HostOutcome) {
        match outcome {
            HostOutcome::Ok => self.ok += 1,
            // changed results are successes too
            HostOutcome::Changed => {
                self.ok += 1;
                self.changed += 1;
            }
            HostOutcome::Failed => self.failed += 1,
            HostOutcome::Skipped => self.skipped += 1,
            HostOutcome::Unreachable => self.unreachable += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.unreachable > 0
    }
}

/// Immutable copy of registry state handed to the composer.
#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub taken_at: Instant,
    pub run_started_at: Option<Instant>,
    pub run_name: Option<String>,
    /// Running tasks in registry insertion order.
    pub running: Vec<TaskRecord>,
    pub pending: usize,
    /// Completed tasks in completion order, oldest first.
    pub completed: Vec<CompletedEntry>,
    /// Notices in arrival order, oldest first.
    pub notices: Vec<Notice>,
    pub tallies: BTreeMap<String, HostTally>,
}

impl RenderSnapshot {
    /// Sequence number of the newest completed entry or notice, if any.
    pub fn last_seq(&self) -> Option<u64> {
        let completed = self.completed.last().map(|entry| entry.seq);
        let notice = self.notices.last().map(|notice| notice.seq);
        completed.max(notice)
    }
}
