use super::event::LifecycleEvent;

/// Messages on the engine -> ingestor queue.
#[derive(Debug)]
pub enum IngestMessage {
    Event(LifecycleEvent),
    Shutdown,
}

/// Messages on the ingestor -> render loop control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMessage {
    Start,
    Refresh,
    Drain,
    Abort,
}
