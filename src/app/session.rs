use std::sync::{atomic::AtomicBool, Arc};
use std::thread::JoinHandle;

use crossbeam_channel::unbounded;
use log::{error, info, warn};

use crate::config::{RenderConfig, DEFAULT_WIDTH};
use crate::display::terminal::stdout_is_tty;
use crate::display::{acquire_with, Composer, FrameSink, TerminalSink, Theme};
use crate::error::{ConfigError, FatalError};
use crate::manager::TaskRegistry;
use crate::pipeline::Pipeline;
use crate::worker::{
    spawn_ingestor_thread, spawn_render_loop, EventIngestor, EventSender, FrameRenderer, IngestReport, LoopReport,
    LoopSettings, LoopState, OutputMode, RenderLoopHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub ingest: IngestReport,
    /// `None` if the render loop thread panicked.
    pub render: Option<LoopReport>,
}

impl SessionReport {
    pub fn final_mode(&self) -> Option<OutputMode> {
        self.render.map(|report| report.final_mode)
    }
}

/// One rendered run: the ingestor thread, the render loop thread and the
/// registry they share.
pub struct LiveSession {
    events: EventSender,
    registry: TaskRegistry,
    ingestor: JoinHandle<IngestReport>,
    render: RenderLoopHandle,
    startup_error: Option<FatalError>,
}

impl LiveSession {
    /// Renders to stdout. If stdout cannot host a live region the session
    /// still starts, in fallback mode, and keeps the reason.
    pub fn start(config: RenderConfig) -> Result<Self, ConfigError> {
        Self::start_with(config, stdout_is_tty(), |theme| -> Box<dyn FrameSink> {
            Box::new(TerminalSink::stdout(theme))
        })
    }

    /// [`LiveSession::start`] with the terminal check made by the caller.
    /// `make_sink` receives the theme the chosen mode calls for.
    pub fn start_with<F>(config: RenderConfig, is_tty: bool, make_sink: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(Theme) -> Box<dyn FrameSink>,
    {
        config.validate()?;
        let theme = if config.color { Theme::default() } else { Theme::monochrome() };

        match acquire_with(&config, is_tty) {
            Ok(width) => Self::build(config, make_sink(theme), OutputMode::Live, width, None),
            Err(e) => {
                warn!("Live output unavailable, using line output: {}", e);
                let width = config.width.unwrap_or(DEFAULT_WIDTH);
                Self::build(config, make_sink(Theme::monochrome()), OutputMode::Fallback, width, Some(e))
            }
        }
    }

    /// Renders to a caller-provided sink.
    pub fn with_sink(
        config: RenderConfig,
        sink: Box<dyn FrameSink>,
        mode: OutputMode,
        width: u16,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::build(config, sink, mode, width, None)
    }

    fn build(
        config: RenderConfig,
        sink: Box<dyn FrameSink>,
        mode: OutputMode,
        width: u16,
        startup_error: Option<FatalError>,
    ) -> Result<Self, ConfigError> {
        let pipeline = Arc::new(Pipeline::from_names(config.transformers.as_slice(), config.secrets.as_slice())?);
        info!("Pipeline stages: {}", pipeline.stage_names().join(", "));

        let registry = TaskRegistry::new(config.history_limit);
        let (control_tx, control_rx) = unbounded();
        let (queue_tx, queue_rx) = unbounded();
        let aborted = Arc::new(AtomicBool::new(false));

        let renderer = FrameRenderer::new(Composer::from_config(&config, width), sink, mode);
        let render = spawn_render_loop(
            registry.clone(),
            renderer,
            control_tx.clone(),
            control_rx,
            LoopSettings {
                interval: config.refresh_interval,
                enable_timer: config.enable_timer,
            },
        );

        let ingestor = EventIngestor::new(registry.clone(), pipeline, control_tx.clone())
            .refresh_on_event(!config.enable_timer);
        let ingestor = spawn_ingestor_thread(queue_rx, ingestor, aborted.clone());

        Ok(Self {
            events: EventSender::new(queue_tx, control_tx, aborted),
            registry,
            ingestor,
            render,
            startup_error,
        })
    }

    /// Handle for the host engine. Cheap to clone across host workers.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn startup_error(&self) -> Option<&FatalError> {
        self.startup_error.as_ref()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn render_state(&self) -> LoopState {
        self.render.state()
    }

    /// Waits for queued events to be applied, then for the final frame.
    pub fn finish(self) -> SessionReport {
        self.events.shutdown();
        let ingest = match self.ingestor.join() {
            Ok(report) => report,
            Err(_) => {
                error!("Ingestor thread panicked.");
                IngestReport::default()
            }
        };
        // no-op when a run end or abort already started the drain
        self.render.drain();
        let render = self.render.join();
        info!(
            "Session finished: {} events applied, {} dropped.",
            ingest.ingested,
            ingest.data_errors + ingest.dropped_after_abort
        );
        SessionReport { ingest, render }
    }
}
