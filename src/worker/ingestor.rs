use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use serde_json::Value;

use crate::error::DataError;
use crate::manager::TaskRegistry;
use crate::models::{FinalStatus, HostOutcome, IngestMessage, LifecycleEvent, LoopMessage, TaskId};
use crate::pipeline::{FieldKind, Pipeline, StageContext};

/// Sanitizes lifecycle events and applies them to the registry. The only
/// writer the registry has.
pub struct EventIngestor {
    registry: TaskRegistry,
    pipeline: Arc<Pipeline>,
    control: Sender<LoopMessage>,
    refresh_on_event: bool,
}

impl EventIngestor {
    pub fn new(registry: TaskRegistry, pipeline: Arc<Pipeline>, control: Sender<LoopMessage>) -> Self {
        Self {
            registry,
            pipeline,
            control,
            refresh_on_event: false,
        }
    }

    /// Ask the render loop for a repaint after every applied event.
    pub fn refresh_on_event(mut self, enabled: bool) -> Self {
        self.refresh_on_event = enabled;
        self
    }

    pub fn ingest(&self, event: LifecycleEvent) -> Result<(), DataError> {
        let event = self.sanitize(event);
        let signal = match &event {
            LifecycleEvent::RunStart { .. } => Some(LoopMessage::Start),
            LifecycleEvent::RunEnd => Some(LoopMessage::Drain),
            _ if self.refresh_on_event => Some(LoopMessage::Refresh),
            _ => None,
        };

        self.registry.observe(event)?;

        if let Some(message) = signal {
            if self.control.send(message).is_err() {
                debug!("Render loop is gone, dropping {:?}.", message);
            }
        }
        Ok(())
    }

    /// Runs every task-derived string through the pipeline.
    pub fn sanitize(&self, event: LifecycleEvent) -> LifecycleEvent {
        match event {
            LifecycleEvent::RunStart { name, check_mode } => LifecycleEvent::RunStart {
                name: name.map(|name| self.pipeline.apply(&name, &StageContext::new(FieldKind::RunName))),
                check_mode,
            },
            LifecycleEvent::TaskQueued { task_id, name } => {
                let name = self.clean_name(&task_id, &name);
                LifecycleEvent::TaskQueued { task_id, name }
            }
            LifecycleEvent::TaskStart { task_id, name, group } => {
                let name = self.clean_name(&task_id, &name);
                let group = group.map(|group| {
                    let ctx = StageContext::new(FieldKind::Group).for_task(&task_id);
                    self.pipeline.apply(&group, &ctx)
                });
                LifecycleEvent::TaskStart { task_id, name, group }
            }
            LifecycleEvent::TaskHostResult {
                task_id,
                host,
                payload,
                outcome,
                no_log,
            } => {
                let ctx = StageContext::new(FieldKind::Host).for_task(&task_id);
                let clean_host = self.pipeline.apply(&host, &ctx);
                let payload = self.pipeline.apply_value(payload, &ctx.for_host(&host));
                LifecycleEvent::TaskHostResult {
                    task_id,
                    host: clean_host,
                    payload,
                    outcome,
                    no_log,
                }
            }
            LifecycleEvent::TaskRetry {
                task_id,
                host,
                retries_left,
            } => {
                let ctx = StageContext::new(FieldKind::Host).for_task(&task_id);
                let host = self.pipeline.apply(&host, &ctx);
                LifecycleEvent::TaskRetry {
                    task_id,
                    host,
                    retries_left,
                }
            }
            other @ (LifecycleEvent::TaskEnd { .. } | LifecycleEvent::RunEnd) => other,
        }
    }

    fn clean_name(&self, task_id: &TaskId, name: &str) -> String {
        let ctx = StageContext::new(FieldKind::TaskName).for_task(task_id);
        self.pipeline.apply(name, &ctx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub ingested: u64,
    pub data_errors: u64,
    pub dropped_after_abort: u64,
}

/// Host-engine side of the event queue. Sending never blocks and never fails
/// the caller: rendering is observational.
#[derive(Clone)]
pub struct EventSender {
    queue: Sender<IngestMessage>,
    control: Sender<LoopMessage>,
    aborted: Arc<AtomicBool>,
}

impl EventSender {
    pub fn new(queue: Sender<IngestMessage>, control: Sender<LoopMessage>, aborted: Arc<AtomicBool>) -> Self {
        Self { queue, control, aborted }
    }

    pub fn send(&self, event: LifecycleEvent) {
        if self.is_aborted() {
            debug!("Run aborted, not forwarding {}.", event.kind());
            return;
        }
        if self.queue.send(IngestMessage::Event(event)).is_err() {
            debug!("Ingestor is gone, event dropped.");
        }
    }

    pub fn run_start(&self, name: Option<String>) {
        self.send(LifecycleEvent::RunStart {
            name,
            check_mode: false,
        });
    }

    pub fn task_queued(&self, task_id: impl Into<TaskId>, name: impl Into<String>) {
        self.send(LifecycleEvent::TaskQueued {
            task_id: task_id.into(),
            name: name.into(),
        });
    }

    pub fn task_start(&self, task_id: impl Into<TaskId>, name: impl Into<String>) {
        self.send(LifecycleEvent::TaskStart {
            task_id: task_id.into(),
            name: name.into(),
            group: None,
        });
    }

    /// Like [`EventSender::task_start`] for a task inside a named section.
    pub fn task_start_in(&self, task_id: impl Into<TaskId>, name: impl Into<String>, group: impl Into<String>) {
        self.send(LifecycleEvent::TaskStart {
            task_id: task_id.into(),
            name: name.into(),
            group: Some(group.into()),
        });
    }

    pub fn task_host_result(
        &self,
        task_id: impl Into<TaskId>,
        host: impl Into<String>,
        payload: Value,
        outcome: HostOutcome,
    ) {
        self.send(LifecycleEvent::TaskHostResult {
            task_id: task_id.into(),
            host: host.into(),
            payload,
            outcome,
            no_log: false,
        });
    }

    pub fn task_retry(&self, task_id: impl Into<TaskId>, host: impl Into<String>, retries_left: u32) {
        self.send(LifecycleEvent::TaskRetry {
            task_id: task_id.into(),
            host: host.into(),
            retries_left,
        });
    }

    pub fn task_end(&self, task_id: impl Into<TaskId>, status: FinalStatus) {
        self.send(LifecycleEvent::TaskEnd {
            task_id: task_id.into(),
            status,
        });
    }

    pub fn run_end(&self) {
        self.send(LifecycleEvent::RunEnd);
    }

    /// Stops forwarding events and tells the render loop to drain now,
    /// bypassing whatever is still queued.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Run aborted, draining render loop.");
        if self.control.send(LoopMessage::Abort).is_err() {
            debug!("Render loop is gone, abort not delivered.");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.queue.send(IngestMessage::Shutdown);
    }
}

pub fn spawn_ingestor_thread(
    receiver: Receiver<IngestMessage>,
    ingestor: EventIngestor,
    aborted: Arc<AtomicBool>,
) -> JoinHandle<IngestReport> {
    thread::spawn(move || {
        let mut report = IngestReport::default();
        loop {
            match receiver.recv() {
                Ok(message) => match message {
                    IngestMessage::Event(event) => {
                        if aborted.load(Ordering::SeqCst) {
                            report.dropped_after_abort += 1;
                            continue;
                        }
                        match ingestor.ingest(event) {
                            Ok(()) => report.ingested += 1,
                            Err(e) => {
                                debug!("Dropped event: {}", e);
                                report.data_errors += 1;
                            }
                        }
                    }
                    IngestMessage::Shutdown => break,
                },
                Err(_) => {
                    info!("Event queue closed.");
                    break;
                }
            }
        }
        report
    })
}
