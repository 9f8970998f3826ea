use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::Local;
use crossbeam_channel::{never, select, tick, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};

use crate::display::{Composer, FrameSink, PrintState};
use crate::error::RenderError;
use crate::manager::TaskRegistry;
use crate::models::{LoopMessage, RenderSnapshot};

/// Consecutive failed ticks before redrawing is abandoned for line output.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// In-place redraw of the live region.
    Live,
    /// One line per event, nothing redrawn.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Draining,
}

impl LoopState {
    fn as_u8(self) -> u8 {
        match self {
            LoopState::Stopped => 0,
            LoopState::Running => 1,
            LoopState::Draining => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Running,
            2 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub frames: u64,
    pub failed_ticks: u64,
    pub final_mode: OutputMode,
    /// Whether the closing frame (scrollback remainder and recap) was written.
    pub drained: bool,
}

/// Turns snapshots into terminal output and tracks how much of the completed
/// history has already been printed.
pub struct FrameRenderer {
    composer: Composer,
    sink: Box<dyn FrameSink>,
    mode: OutputMode,
    /// Set by the first redraw attempt. From then on the sink may hold
    /// terminal state that has to be handed back, even after falling back.
    live_acquired: bool,
    consecutive_failures: u32,
    cursor: u64,
    printed: PrintState,
    frames: u64,
    failed_ticks: u64,
}

impl FrameRenderer {
    pub fn new(composer: Composer, sink: Box<dyn FrameSink>, mode: OutputMode) -> Self {
        Self {
            composer,
            sink,
            mode,
            live_acquired: false,
            consecutive_failures: 0,
            cursor: 0,
            printed: PrintState::default(),
            frames: 0,
            failed_ticks: 0,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Sequence number of the newest completed task or notice already printed.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn render(&mut self, snapshot: &RenderSnapshot, now: Instant) -> Result<(), RenderError> {
        match self.mode {
            OutputMode::Live => {
                self.live_acquired = true;
                let (frame, next) = self.composer.compose(snapshot, now, &self.printed);
                let result = self.sink.redraw(&frame).map_err(RenderError::Redraw);
                self.settle(result, snapshot, next)
            }
            OutputMode::Fallback => {
                let (lines, next) = self.composer.compose_lines(snapshot, Local::now(), &self.printed);
                let result = if lines.is_empty() {
                    Ok(())
                } else {
                    self.sink.append(&lines).map_err(RenderError::Append)
                };
                self.settle(result, snapshot, next)
            }
        }
    }

    /// Writes the closing frame. Does not release the terminal.
    pub fn render_final(&mut self, snapshot: &RenderSnapshot, now: Instant) -> Result<(), RenderError> {
        let (frame, next) = self.composer.compose_final(snapshot, now, &self.printed);
        let result = match self.mode {
            OutputMode::Live => {
                self.live_acquired = true;
                self.sink.redraw(&frame).map_err(RenderError::Redraw)
            }
            OutputMode::Fallback => self.sink.append(&frame.scrollback).map_err(RenderError::Append),
        };
        self.settle(result, snapshot, next)
    }

    /// Restores the terminal if the live region was ever used. A renderer
    /// that started in line mode never touched it.
    pub fn release(&mut self) -> Result<(), RenderError> {
        if !self.live_acquired {
            return Ok(());
        }
        self.live_acquired = false;
        self.sink.release().map_err(RenderError::Release)
    }

    fn settle(
        &mut self,
        result: Result<(), RenderError>,
        snapshot: &RenderSnapshot,
        next: PrintState,
    ) -> Result<(), RenderError> {
        match result {
            Ok(()) => {
                self.frames += 1;
                self.consecutive_failures = 0;
                if let Some(seq) = snapshot.last_seq() {
                    self.cursor = self.cursor.max(seq);
                }
                self.printed = next;
                Ok(())
            }
            Err(e) => {
                self.failed_ticks += 1;
                self.consecutive_failures += 1;
                warn!(
                    "Render tick failed ({}/{}): {}",
                    self.consecutive_failures, MAX_CONSECUTIVE_FAILURES, e
                );
                if self.mode == OutputMode::Live && self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!("Live region unusable, switching to line output.");
                    self.mode = OutputMode::Fallback;
                    self.consecutive_failures = 0;
                }
                Err(e)
            }
        }
    }

    fn report(&self, drained: bool) -> LoopReport {
        LoopReport {
            frames: self.frames,
            failed_ticks: self.failed_ticks,
            final_mode: self.mode,
            drained,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub interval: Duration,
    pub enable_timer: bool,
}

pub struct RenderLoopHandle {
    control: Sender<LoopMessage>,
    state: Arc<AtomicU8>,
    thread: JoinHandle<LoopReport>,
}

impl RenderLoopHandle {
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn drain(&self) {
        let _ = self.control.send(LoopMessage::Drain);
    }

    pub fn join(self) -> Option<LoopReport> {
        match self.thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("Render loop thread panicked.");
                None
            }
        }
    }
}

/// Starts the render loop thread in `Stopped`. It begins ticking on
/// [`LoopMessage::Start`] and exits after the drain frame.
pub fn spawn_render_loop(
    registry: TaskRegistry,
    renderer: FrameRenderer,
    control_tx: Sender<LoopMessage>,
    control: Receiver<LoopMessage>,
    settings: LoopSettings,
) -> RenderLoopHandle {
    let state = Arc::new(AtomicU8::new(LoopState::Stopped.as_u8()));
    let shared = state.clone();
    let thread = thread::spawn(move || run_loop(registry, renderer, control, settings, shared));
    RenderLoopHandle {
        control: control_tx,
        state,
        thread,
    }
}

fn run_loop(
    registry: TaskRegistry,
    mut renderer: FrameRenderer,
    control: Receiver<LoopMessage>,
    settings: LoopSettings,
    shared: Arc<AtomicU8>,
) -> LoopReport {
    let mut state = LoopState::Stopped;
    // a tick receiver keeps at most one pending tick, late ticks are dropped
    let mut ticker = never();

    loop {
        shared.store(state.as_u8(), Ordering::SeqCst);
        match state {
            LoopState::Stopped => match control.recv() {
                Ok(LoopMessage::Start) => {
                    info!("Render loop running every {:?}.", settings.interval);
                    if settings.enable_timer {
                        ticker = tick(settings.interval);
                    }
                    repaint(&registry, &mut renderer);
                    state = LoopState::Running;
                }
                // the run finished before it ever started
                Ok(LoopMessage::Drain) | Ok(LoopMessage::Abort) => state = LoopState::Draining,
                Ok(LoopMessage::Refresh) => {}
                Err(_) => {
                    debug!("Control channel closed before the run started.");
                    return renderer.report(false);
                }
            },
            LoopState::Running => select! {
                recv(control) -> message => match message {
                    Ok(LoopMessage::Refresh) => {
                        if coalesce_refreshes(&control) {
                            state = LoopState::Draining;
                        } else {
                            repaint(&registry, &mut renderer);
                        }
                    }
                    Ok(LoopMessage::Start) => {}
                    Ok(LoopMessage::Drain) | Ok(LoopMessage::Abort) | Err(_) => state = LoopState::Draining,
                },
                recv(ticker) -> _ => repaint(&registry, &mut renderer),
            },
            LoopState::Draining => {
                info!("Render loop draining.");
                let snapshot = registry.snapshot_since(renderer.cursor());
                let drained = match renderer.render_final(&snapshot, Instant::now()) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Final frame failed: {}", e);
                        false
                    }
                };
                if let Err(e) = renderer.release() {
                    warn!("{}", e);
                }
                shared.store(LoopState::Stopped.as_u8(), Ordering::SeqCst);
                return renderer.report(drained);
            }
        }
    }
}

fn repaint(registry: &TaskRegistry, renderer: &mut FrameRenderer) {
    let snapshot = registry.snapshot_since(renderer.cursor());
    // failures are logged and counted by the renderer, the next tick retries
    let _ = renderer.render(&snapshot, Instant::now());
}

/// Swallows queued refresh requests so a burst of events costs one repaint.
/// Returns true when a drain request was found behind them.
fn coalesce_refreshes(control: &Receiver<LoopMessage>) -> bool {
    loop {
        match control.try_recv() {
            Ok(LoopMessage::Refresh) | Ok(LoopMessage::Start) => continue,
            Ok(LoopMessage::Drain) | Ok(LoopMessage::Abort) => return true,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Frame, Line};
    use crate::models::{FinalStatus, HostOutcome, LifecycleEvent};
    use serde_json::json;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Default)]
    struct Recorded {
        redraws: Vec<Frame>,
        appended: Vec<String>,
        released: bool,
    }

    struct ScriptedSink {
        log: Arc<Mutex<Recorded>>,
        failures_left: u32,
    }

    impl FrameSink for ScriptedSink {
        fn redraw(&mut self, frame: &Frame) -> io::Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"));
            }
            self.log.lock().redraws.push(frame.clone());
            Ok(())
        }

        fn append(&mut self, lines: &[Line]) -> io::Result<()> {
            self.log.lock().appended.extend(lines.iter().map(Line::text));
            Ok(())
        }

        fn release(&mut self) -> io::Result<()> {
            self.log.lock().released = true;
            Ok(())
        }
    }

    fn renderer(failures: u32) -> (FrameRenderer, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let sink = ScriptedSink {
            log: log.clone(),
            failures_left: failures,
        };
        (FrameRenderer::new(Composer::new(80, 4), Box::new(sink), OutputMode::Live), log)
    }

    fn finished_registry() -> TaskRegistry {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskStart {
                task_id: "t1".into(),
                name: "Install pkg".to_string(),
                group: None,
            })
            .unwrap();
        registry
            .observe(LifecycleEvent::TaskEnd {
                task_id: "t1".into(),
                status: FinalStatus::Ok,
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_successful_tick_advances_cursor() {
        let registry = finished_registry();
        let (mut renderer, log) = renderer(0);
        renderer.render(&registry.snapshot_since(0), Instant::now()).unwrap();
        assert_eq!(renderer.cursor(), 1);

        // nothing new, so the next frame has no scrollback
        renderer
            .render(&registry.snapshot_since(renderer.cursor()), Instant::now())
            .unwrap();
        let log = log.lock();
        assert_eq!(log.redraws.len(), 2);
        assert_eq!(log.redraws[0].scrollback.len(), 1);
        assert!(log.redraws[1].scrollback.is_empty());
    }

    #[test]
    fn test_failed_tick_keeps_cursor_for_retry() {
        let registry = finished_registry();
        let (mut renderer, log) = renderer(1);
        assert!(renderer.render(&registry.snapshot_since(0), Instant::now()).is_err());
        assert_eq!(renderer.cursor(), 0);
        assert_eq!(renderer.mode(), OutputMode::Live);

        renderer
            .render(&registry.snapshot_since(renderer.cursor()), Instant::now())
            .unwrap();
        assert_eq!(log.lock().redraws[0].scrollback.len(), 1);
    }

    #[test]
    fn test_three_failures_switch_to_fallback() {
        let registry = finished_registry();
        let (mut renderer, log) = renderer(u32::MAX);
        for _ in 0..3 {
            assert!(renderer.render(&registry.snapshot_since(0), Instant::now()).is_err());
        }
        assert_eq!(renderer.mode(), OutputMode::Fallback);

        renderer
            .render(&registry.snapshot_since(renderer.cursor()), Instant::now())
            .unwrap();
        let log = log.lock();
        assert!(log.redraws.is_empty());
        assert_eq!(log.appended.len(), 1);
        assert!(log.appended[0].contains("Install pkg"));
    }

    #[test]
    fn test_fallback_announces_each_start_once() {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskStart {
                task_id: "t1".into(),
                name: "Long job".to_string(),
                group: None,
            })
            .unwrap();
        let log = Arc::new(Mutex::new(Recorded::default()));
        let sink = ScriptedSink {
            log: log.clone(),
            failures_left: 0,
        };
        let mut renderer = FrameRenderer::new(Composer::new(80, 4), Box::new(sink), OutputMode::Fallback);
        for _ in 0..3 {
            renderer.render(&registry.snapshot(), Instant::now()).unwrap();
        }
        let appended = &log.lock().appended;
        assert_eq!(appended.len(), 1);
        assert!(appended[0].ends_with("Long job - started"));
    }

    #[test]
    fn test_release_after_fallback_restores_terminal() {
        let registry = finished_registry();
        let (mut renderer, log) = renderer(u32::MAX);
        for _ in 0..3 {
            let _ = renderer.render(&registry.snapshot_since(0), Instant::now());
        }
        assert_eq!(renderer.mode(), OutputMode::Fallback);
        renderer.release().unwrap();
        assert!(log.lock().released);
    }

    #[test]
    fn test_line_mode_from_start_never_releases() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let sink = ScriptedSink {
            log: log.clone(),
            failures_left: 0,
        };
        let mut renderer = FrameRenderer::new(Composer::new(80, 4), Box::new(sink), OutputMode::Fallback);
        renderer.render_final(&TaskRegistry::new(4).snapshot(), Instant::now()).unwrap();
        renderer.release().unwrap();
        assert!(!log.lock().released);
    }

    #[test]
    fn test_fallback_prints_results_while_task_runs() {
        let registry = TaskRegistry::new(16);
        registry
            .observe(LifecycleEvent::TaskStart {
                task_id: "t1".into(),
                name: "Rolling restart".to_string(),
                group: None,
            })
            .unwrap();
        let log = Arc::new(Mutex::new(Recorded::default()));
        let sink = ScriptedSink {
            log: log.clone(),
            failures_left: 0,
        };
        let mut renderer = FrameRenderer::new(Composer::new(80, 4), Box::new(sink), OutputMode::Fallback);
        renderer.render(&registry.snapshot(), Instant::now()).unwrap();

        registry
            .observe(LifecycleEvent::TaskHostResult {
                task_id: "t1".into(),
                host: "web1".to_string(),
                payload: json!({}),
                outcome: HostOutcome::Ok,
                no_log: false,
            })
            .unwrap();
        renderer
            .render(&registry.snapshot_since(renderer.cursor()), Instant::now())
            .unwrap();
        assert_eq!(log.lock().appended.len(), 2);
        assert!(log.lock().appended[1].contains("✔ web1 - Rolling restart"));

        registry
            .observe(LifecycleEvent::TaskEnd {
                task_id: "t1".into(),
                status: FinalStatus::Ok,
            })
            .unwrap();
        renderer
            .render(&registry.snapshot_since(renderer.cursor()), Instant::now())
            .unwrap();
        let appended = &log.lock().appended;
        assert_eq!(appended.iter().filter(|line| line.contains("web1")).count(), 1);
        assert_eq!(appended.len(), 2);
    }

    #[test]
    fn test_loop_drains_on_run_end() {
        let registry = finished_registry();
        let (renderer, log) = renderer(0);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let handle = spawn_render_loop(
            registry,
            renderer,
            control_tx.clone(),
            control_rx,
            LoopSettings {
                interval: Duration::from_millis(10),
                enable_timer: true,
            },
        );
        control_tx.send(LoopMessage::Start).unwrap();
        control_tx.send(LoopMessage::Drain).unwrap();
        let report = handle.join().unwrap();

        assert!(report.drained);
        assert_eq!(report.final_mode, OutputMode::Live);
        let log = log.lock();
        assert!(log.released);
        let all: Vec<String> = log
            .redraws
            .iter()
            .flat_map(|frame| frame.scrollback.iter().map(Line::text))
            .collect();
        // the completed task is printed exactly once across all frames
        assert_eq!(all.iter().filter(|line| line.contains("Install pkg")).count(), 1);
        assert!(all.iter().any(|line| line.starts_with("Play Recap")));
        assert!(log.redraws.last().unwrap().live.is_empty());
    }

    #[test]
    fn test_loop_without_start_still_drains() {
        let (renderer, log) = renderer(0);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let handle = spawn_render_loop(
            TaskRegistry::new(4),
            renderer,
            control_tx.clone(),
            control_rx,
            LoopSettings {
                interval: Duration::from_millis(10),
                enable_timer: false,
            },
        );
        handle.drain();
        let report = handle.join().unwrap();
        assert!(report.drained);
        assert!(log.lock().released);
    }

    #[test]
    fn test_coalesce_stops_at_drain() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(LoopMessage::Refresh).unwrap();
        tx.send(LoopMessage::Drain).unwrap();
        assert!(coalesce_refreshes(&rx));

        tx.send(LoopMessage::Refresh).unwrap();
        assert!(!coalesce_refreshes(&rx));
    }
}
