use crate::error::PipelineError;
use crate::models::TaskId;

/// What kind of text a stage is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind<'a> {
    TaskName,
    RunName,
    /// Label of the section a task belongs to.
    Group,
    Host,
    /// A string value inside a payload, with the key it was found under.
    PayloadValue { key: Option<&'a str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContext<'a> {
    pub task_id: Option<&'a TaskId>,
    pub host: Option<&'a str>,
    pub field: FieldKind<'a>,
}

impl<'a> StageContext<'a> {
    pub fn new(field: FieldKind<'a>) -> Self {
        Self {
            task_id: None,
            host: None,
            field,
        }
    }

    pub fn for_task(mut self, task_id: &'a TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn for_host(mut self, host: &'a str) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_field(mut self, field: FieldKind<'a>) -> Self {
        self.field = field;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    Text(String),
    /// Drop the text entirely; the pipeline emits the redaction marker.
    Redact,
}

/// One ordered text transform. Implementations must be pure with respect to
/// their input: any configuration is fixed at construction.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, text: &str, ctx: &StageContext<'_>) -> Result<StageOutput, PipelineError>;
}
