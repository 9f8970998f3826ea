//! Live terminal rendering for automation runs.
//!
//! A host engine reports task lifecycle events through an [`EventSender`].
//! Events are sanitized by the [`Pipeline`] and applied to the
//! [`TaskRegistry`]; an independent render loop snapshots the registry on a
//! timer and redraws the live region, leaving finished tasks in scrollback.

pub mod app;
pub mod config;
pub mod display;
pub mod error;
pub mod manager;
pub mod models;
pub mod pipeline;
pub mod worker;

pub use app::{LiveSession, SessionReport};
pub use config::RenderConfig;
pub use error::{ConfigError, DataError, FatalError, PipelineError, RenderError};
pub use manager::TaskRegistry;
pub use models::{FinalStatus, HostOutcome, LifecycleEvent, RenderSnapshot, TaskId, TaskRecord, TaskStatus};
pub use pipeline::Pipeline;
pub use worker::{EventSender, OutputMode};
