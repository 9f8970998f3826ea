pub mod ingestor;
pub mod render_loop;

pub use ingestor::{spawn_ingestor_thread, EventIngestor, EventSender, IngestReport};
pub use render_loop::{
    spawn_render_loop, FrameRenderer, LoopReport, LoopSettings, LoopState, OutputMode, RenderLoopHandle,
    MAX_CONSECUTIVE_FAILURES,
};
