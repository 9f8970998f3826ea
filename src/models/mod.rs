pub mod event;
pub mod message;
pub mod snapshot;
pub mod task;

pub use event::LifecycleEvent;
pub use message::{IngestMessage, LoopMessage};
pub use snapshot::{CompletedEntry, HostTally, Notice, NoticeKind, RenderSnapshot};
pub use task::{FinalStatus, HostOutcome, HostResult, TaskId, TaskRecord, TaskStatus};
