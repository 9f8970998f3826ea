use std::io;

use thiserror::Error;

use crate::models::TaskId;

/// Out-of-order or unknown-id events. Recovered by dropping the event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("{event} for unknown task '{task_id}'")]
    UnknownTask { event: &'static str, task_id: TaskId },

    #[error("{event} for task '{task_id}' which already finished")]
    AlreadyFinished { event: &'static str, task_id: TaskId },
}

/// A transform stage failed. Recovered by substituting the redaction marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage '{stage}' failed: {reason}")]
pub struct PipelineError {
    pub stage: String,
    pub reason: String,
}

impl PipelineError {
    pub fn new(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Terminal I/O failed during a tick. Recovered by skip-and-retry.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to redraw live region: {0}")]
    Redraw(#[source] io::Error),

    #[error("failed to write fallback lines: {0}")]
    Append(#[source] io::Error),

    #[error("failed to release terminal: {0}")]
    Release(#[source] io::Error),
}

/// The live terminal region could not be acquired at startup.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("output is not an interactive terminal")]
    NotInteractive,

    #[error("terminal unavailable: {0}")]
    TerminalUnavailable(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("unknown transformer '{0}'")]
    UnknownTransformer(String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
