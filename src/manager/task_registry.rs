use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Instant,
};

use chrono::Local;
use log::{debug, info};
use parking_lot::Mutex;

use crate::error::DataError;
use crate::models::{
    CompletedEntry, HostResult, HostTally, LifecycleEvent, Notice, NoticeKind, RenderSnapshot, TaskId, TaskRecord,
    TaskStatus,
};

#[derive(Default)]
struct RegistryState {
    live: HashMap<TaskId, TaskRecord>,
    // insertion order of `live`
    order: Vec<TaskId>,
    history: VecDeque<CompletedEntry>,
    notices: VecDeque<Notice>,
    finished: HashSet<TaskId>,
    next_seq: u64,
    tallies: BTreeMap<String, HostTally>,
    run_started_at: Option<Instant>,
    run_name: Option<String>,
}

impl RegistryState {
    fn live_mut(&mut self, event: &'static str, id: &TaskId) -> Result<&mut TaskRecord, DataError> {
        if self.finished.contains(id) {
            return Err(DataError::AlreadyFinished {
                event,
                task_id: id.clone(),
            });
        }
        self.live.get_mut(id).ok_or_else(|| DataError::UnknownTask {
            event,
            task_id: id.clone(),
        })
    }

    fn insert_live(&mut self, record: TaskRecord) {
        self.order.push(record.id.clone());
        self.live.insert(record.id.clone(), record);
    }

    fn retire(&mut self, id: &TaskId, history_limit: usize) {
        let Some(record) = self.live.remove(id) else {
            return;
        };
        self.order.retain(|candidate| candidate != id);
        self.finished.insert(id.clone());
        self.next_seq += 1;
        self.history.push_back(CompletedEntry {
            seq: self.next_seq,
            record,
        });
        while self.history.len() > history_limit {
            self.history.pop_front();
        }
    }

    fn notice(&mut self, kind: NoticeKind, history_limit: usize) {
        self.next_seq += 1;
        self.notices.push_back(Notice {
            seq: self.next_seq,
            clock: Local::now(),
            kind,
        });
        while self.notices.len() > history_limit {
            self.notices.pop_front();
        }
    }
}

/// Shared store of task state for one run.
///
/// Cloning yields another handle to the same registry. All mutation goes
/// through [`TaskRegistry::observe`]; readers only ever get copies.
#[derive(Clone)]
pub struct TaskRegistry {
    state: Arc<Mutex<RegistryState>>,
    history_limit: usize,
    snapshot_completed: usize,
}

impl TaskRegistry {
    pub fn new(history_limit: usize) -> Self {
        let history_limit = history_limit.max(1);
        TaskRegistry {
            state: Arc::new(Mutex::new(RegistryState::default())),
            history_limit,
            snapshot_completed: history_limit,
        }
    }

    /// Caps how many completed entries [`TaskRegistry::snapshot`] returns.
    pub fn with_snapshot_completed(mut self, count: usize) -> Self {
        self.snapshot_completed = count;
        self
    }

    pub fn observe(&self, event: LifecycleEvent) -> Result<(), DataError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let kind = event.kind();

        match event {
            LifecycleEvent::RunStart { name, check_mode } => {
                state.run_started_at.get_or_insert(now);
                if name.is_some() {
                    state.run_name = name.clone();
                }
                state.notice(NoticeKind::RunBanner { name, check_mode }, self.history_limit);
                info!("Run started.");
            }
            LifecycleEvent::TaskQueued { task_id, name } => {
                if state.finished.contains(&task_id) {
                    return Err(DataError::AlreadyFinished { event: kind, task_id });
                }
                match state.live.get_mut(&task_id) {
                    Some(record) => record.name = name,
                    None => state.insert_live(TaskRecord::pending(task_id, name)),
                }
            }
            LifecycleEvent::TaskStart { task_id, name, group } => {
                if state.finished.contains(&task_id) {
                    return Err(DataError::AlreadyFinished { event: kind, task_id });
                }
                match state.live.get_mut(&task_id) {
                    Some(record) => {
                        // a repeated start refreshes the label but keeps the original start time
                        record.name = name;
                        if group.is_some() {
                            record.group = group;
                        }
                        if record.status == TaskStatus::Pending {
                            record.status = TaskStatus::Running;
                            record.started_at = Some(now);
                        }
                    }
                    None => {
                        let mut record = TaskRecord::running(task_id, name, now);
                        record.group = group;
                        state.insert_live(record);
                    }
                }
            }
            LifecycleEvent::TaskHostResult {
                task_id,
                host,
                payload,
                outcome,
                no_log,
            } => {
                let record = state.live_mut(kind, &task_id)?;
                if record.status == TaskStatus::Pending {
                    debug!("Result for queued task '{}' before its start, promoting.", task_id);
                    record.status = TaskStatus::Running;
                    record.started_at = Some(now);
                }
                let elapsed = record.elapsed(now);
                record.host_results.push(Arc::new(HostResult {
                    host: host.clone(),
                    payload,
                    outcome,
                    received_at: Local::now(),
                    elapsed,
                    no_log,
                }));
                state.tallies.entry(host).or_default().record(outcome);
            }
            LifecycleEvent::TaskRetry {
                task_id,
                host,
                retries_left,
            } => {
                let record = state.live_mut(kind, &task_id)?;
                let retry = NoticeKind::Retry {
                    task: record.name.clone(),
                    group: record.group.clone(),
                    host,
                    retries_left,
                };
                state.notice(retry, self.history_limit);
            }
            LifecycleEvent::TaskEnd { task_id, status } => {
                let record = state.live_mut(kind, &task_id)?;
                record.started_at.get_or_insert(now);
                record.ended_at = Some(now);
                record.finished_clock = Some(Local::now());
                record.status = status.into();
                state.retire(&task_id, self.history_limit);
            }
            LifecycleEvent::RunEnd => {
                info!("Run ended.");
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        self.snapshot_since(0)
    }

    /// Snapshot whose completed list and notices hold only entries newer than
    /// `seq`. Completed entries are capped at the configured snapshot size.
    pub fn snapshot_since(&self, seq: u64) -> RenderSnapshot {
        let state = self.state.lock();
        let newer = state.history.iter().filter(|entry| entry.seq > seq).count();
        let skip = newer.saturating_sub(self.snapshot_completed);

        let running = state
            .order
            .iter()
            .filter_map(|id| state.live.get(id))
            .filter(|record| record.status == TaskStatus::Running)
            .cloned()
            .collect();
        let pending = state
            .live
            .values()
            .filter(|record| record.status == TaskStatus::Pending)
            .count();
        let completed = state
            .history
            .iter()
            .filter(|entry| entry.seq > seq)
            .skip(skip)
            .cloned()
            .collect();
        let notices = state.notices.iter().filter(|notice| notice.seq > seq).cloned().collect();

        RenderSnapshot {
            taken_at: Instant::now(),
            run_started_at: state.run_started_at,
            run_name: state.run_name.clone(),
            running,
            pending,
            completed,
            notices,
            tallies: state.tallies.clone(),
        }
    }

    /// Live records plus retained history.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.live.len() + state.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        let state = self.state.lock();
        state.live.get(id).cloned().or_else(|| {
            state
                .history
                .iter()
                .find(|entry| &entry.record.id == id)
                .map(|entry| entry.record.clone())
        })
    }

    pub fn get_task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.get(id).map(|record| record.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FinalStatus, HostOutcome};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn start(id: &str, name: &str) -> LifecycleEvent {
        LifecycleEvent::TaskStart {
            task_id: id.into(),
            name: name.to_string(),
            group: None,
        }
    }

    fn result(id: &str, host: &str, outcome: HostOutcome) -> LifecycleEvent {
        LifecycleEvent::TaskHostResult {
            task_id: id.into(),
            host: host.to_string(),
            payload: json!({"msg": host}),
            outcome,
            no_log: false,
        }
    }

    fn end(id: &str, status: FinalStatus) -> LifecycleEvent {
        LifecycleEvent::TaskEnd {
            task_id: id.into(),
            status,
        }
    }

    #[test]
    fn test_start_then_end_moves_to_history() {
        let registry = TaskRegistry::new(16);
        registry.observe(start("t1", "Install pkg")).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.running.len(), 1);
        assert_eq!(snapshot.running[0].name, "Install pkg");
        assert!(snapshot.running[0].elapsed(snapshot.taken_at) < std::time::Duration::from_secs(1));

        registry.observe(end("t1", FinalStatus::Ok)).unwrap();
        let snapshot = registry.snapshot();
        assert!(snapshot.running.is_empty());
        assert_eq!(snapshot.completed.len(), 1);
        assert_eq!(snapshot.completed[0].record.id, TaskId::from("t1"));
        assert_eq!(snapshot.completed[0].record.status, TaskStatus::Ok);
        assert!(snapshot.completed[0].record.is_consistent());
    }

    #[test]
    fn test_duplicate_start_keeps_started_at() {
        let registry = TaskRegistry::new(16);
        registry.observe(start("t1", "first")).unwrap();
        let before = registry.get(&"t1".into()).unwrap().started_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.observe(start("t1", "renamed")).unwrap();

        let record = registry.get(&"t1".into()).unwrap();
        assert_eq!(record.started_at, before);
        assert_eq!(record.name, "renamed");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_result_is_data_error() {
        let registry = TaskRegistry::new(16);
        registry.observe(start("t1", "x")).unwrap();
        let err = registry.observe(result("ghost", "web1", HostOutcome::Ok)).unwrap_err();
        assert_eq!(
            err,
            DataError::UnknownTask {
                event: "task_host_result",
                task_id: "ghost".into()
            }
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot().tallies.is_empty());
    }

    #[test]
    fn test_unknown_end_is_data_error() {
        let registry = TaskRegistry::new(16);
        assert!(registry.observe(end("ghost", FinalStatus::Failed)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_events_after_end_are_rejected() {
        let registry = TaskRegistry::new(16);
        registry.observe(start("t1", "x")).unwrap();
        registry.observe(end("t1", FinalStatus::Failed)).unwrap();

        for event in [
            start("t1", "again"),
            result("t1", "web1", HostOutcome::Ok),
            end("t1", FinalStatus::Ok),
        ] {
            assert!(matches!(
                registry.observe(event),
                Err(DataError::AlreadyFinished { .. })
            ));
        }
        assert_eq!(registry.get_task_status(&"t1".into()), Some(TaskStatus::Failed));
    }

    #[test]
    fn test_interleaved_host_results_append() {
        let registry = TaskRegistry::new(16);
        registry.observe(start("t1", "x")).unwrap();
        registry.observe(start("t2", "y")).unwrap();
        registry.observe(result("t1", "web1", HostOutcome::Ok)).unwrap();
        registry.observe(result("t2", "web1", HostOutcome::Changed)).unwrap();
        registry.observe(result("t1", "web2", HostOutcome::Failed)).unwrap();

        let record = registry.get(&"t1".into()).unwrap();
        let hosts: Vec<&str> = record.host_results.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["web1", "web2"]);

        let tallies = registry.snapshot().tallies;
        assert_eq!(tallies["web1"].ok, 2);
        assert_eq!(tallies["web1"].changed, 1);
        assert_eq!(tallies["web2"].failed, 1);
    }

    #[test]
    fn test_queued_task_promoted_by_result() {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskQueued {
                task_id: "t1".into(),
                name: "x".to_string(),
            })
            .unwrap();
        assert_eq!(registry.snapshot().pending, 1);
        assert!(registry.snapshot().running.is_empty());

        registry.observe(result("t1", "web1", HostOutcome::Ok)).unwrap();
        let record = registry.get(&"t1".into()).unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_end_of_queued_task_sets_both_timestamps() {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskQueued {
                task_id: "t1".into(),
                name: "x".to_string(),
            })
            .unwrap();
        registry.observe(end("t1", FinalStatus::Skipped)).unwrap();
        let record = registry.get(&"t1".into()).unwrap();
        assert!(record.is_consistent());
        assert_eq!(record.status, TaskStatus::Skipped);
    }

    #[test]
    fn test_running_order_is_insertion_order() {
        let registry = TaskRegistry::new(16);
        for id in ["c", "a", "b"] {
            registry.observe(start(id, id)).unwrap();
        }
        let ids: Vec<String> = registry
            .snapshot()
            .running
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let registry = TaskRegistry::new(2);
        for id in ["t1", "t2", "t3"] {
            registry.observe(start(id, id)).unwrap();
            registry.observe(end(id, FinalStatus::Ok)).unwrap();
        }
        let snapshot = registry.snapshot();
        let ids: Vec<String> = snapshot.completed.iter().map(|e| e.record.id.to_string()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);
        assert_eq!(snapshot.last_seq(), Some(3));
        assert_eq!(registry.len(), 2);
        // evicted ids still may not restart
        assert!(registry.observe(start("t1", "again")).is_err());
    }

    #[test]
    fn test_snapshot_since_filters_seen_entries() {
        let registry = TaskRegistry::new(16);
        for id in ["t1", "t2", "t3"] {
            registry.observe(start(id, id)).unwrap();
            registry.observe(end(id, FinalStatus::Ok)).unwrap();
        }
        let snapshot = registry.snapshot_since(2);
        assert_eq!(snapshot.completed.len(), 1);
        assert_eq!(snapshot.completed[0].seq, 3);
    }

    #[test]
    fn test_snapshot_caps_completed() {
        let registry = TaskRegistry::new(16).with_snapshot_completed(1);
        for id in ["t1", "t2"] {
            registry.observe(start(id, id)).unwrap();
            registry.observe(end(id, FinalStatus::Ok)).unwrap();
        }
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.completed.len(), 1);
        assert_eq!(snapshot.completed[0].record.id, TaskId::from("t2"));
    }

    #[test]
    fn test_run_start_records_name() {
        let registry = TaskRegistry::new(4);
        registry
            .observe(LifecycleEvent::RunStart {
                name: Some("site.yml".to_string()),
                check_mode: true,
            })
            .unwrap();
        let snapshot = registry.snapshot();
        assert!(snapshot.run_started_at.is_some());
        assert_eq!(snapshot.run_name.as_deref(), Some("site.yml"));
        assert_eq!(
            snapshot.notices[0].kind,
            NoticeKind::RunBanner {
                name: Some("site.yml".to_string()),
                check_mode: true
            }
        );
    }

    #[test]
    fn test_retry_notice_shares_completion_order() {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskStart {
                task_id: "t1".into(),
                name: "Wait for port".to_string(),
                group: Some("db".to_string()),
            })
            .unwrap();
        registry.observe(start("t0", "quick")).unwrap();
        registry.observe(end("t0", FinalStatus::Ok)).unwrap();
        registry
            .observe(LifecycleEvent::TaskRetry {
                task_id: "t1".into(),
                host: "db1".to_string(),
                retries_left: 2,
            })
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.completed[0].seq, 1);
        assert_eq!(snapshot.notices.len(), 1);
        assert_eq!(snapshot.notices[0].seq, 2);
        assert_eq!(
            snapshot.notices[0].kind,
            NoticeKind::Retry {
                task: "Wait for port".to_string(),
                group: Some("db".to_string()),
                host: "db1".to_string(),
                retries_left: 2,
            }
        );
        assert_eq!(snapshot.last_seq(), Some(2));
        assert!(registry.snapshot_since(2).notices.is_empty());

        let err = registry
            .observe(LifecycleEvent::TaskRetry {
                task_id: "ghost".into(),
                host: "db1".to_string(),
                retries_left: 1,
            })
            .unwrap_err();
        assert!(matches!(err, DataError::UnknownTask { .. }));
    }

    #[test]
    fn test_repeated_start_without_group_keeps_group() {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskStart {
                task_id: "t1".into(),
                name: "x".to_string(),
                group: Some("web".to_string()),
            })
            .unwrap();
        registry.observe(start("t1", "x")).unwrap();
        assert_eq!(registry.get(&"t1".into()).unwrap().group.as_deref(), Some("web"));
    }
}
