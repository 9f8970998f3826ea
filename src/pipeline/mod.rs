//! Sanitize/transform pipeline.
//!
//! Every string derived from a task passes through here before it is stored.
//! The control-character sanitizer always runs first; user stages follow in
//! registration order. A stage that fails or asks for redaction replaces the
//! whole text with [`REDACTION_MARKER`].

mod stage;
mod stages;

use log::warn;
use serde_json::{Map, Value};

use crate::error::{ConfigError, PipelineError};

pub use stage::{FieldKind, Stage, StageContext, StageOutput};
pub use stages::{ControlSanitizer, Identity, Placeholder, SecretMask, SensitiveKeys, PLACEHOLDER_TEXT, SECRET_MASK};

pub const REDACTION_MARKER: &str = "<redacted>";

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// A pipeline holding only the mandatory sanitizer.
    pub fn new() -> Self {
        Self {
            stages: vec![Box::new(ControlSanitizer)],
        }
    }

    /// Builds the pipeline from catalog stage names, in the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S], secrets: &[String]) -> Result<Self, ConfigError> {
        let mut pipeline = Self::new();
        for name in names {
            let stage: Box<dyn Stage> = match name.as_ref() {
                // already first, listing it again is harmless
                "sanitize" => continue,
                "identity" => Box::new(Identity),
                "placeholder" => Box::new(Placeholder),
                "mask-secrets" => Box::new(SecretMask::new(secrets.iter().cloned())),
                "sensitive-keys" => Box::new(SensitiveKeys),
                other => return Err(ConfigError::UnknownTransformer(other.to_string())),
            };
            pipeline.register(stage);
        }
        Ok(pipeline)
    }

    pub fn register(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.register(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage in order. `Ok(None)` means a stage asked for redaction.
    pub fn try_apply(&self, text: &str, ctx: &StageContext<'_>) -> Result<Option<String>, PipelineError> {
        let mut current = text.to_string();
        for stage in &self.stages {
            match stage.apply(&current, ctx)? {
                StageOutput::Text(next) => current = next,
                StageOutput::Redact => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Fail-closed variant of [`Pipeline::try_apply`].
    pub fn apply(&self, text: &str, ctx: &StageContext<'_>) -> String {
        match self.try_apply(text, ctx) {
            Ok(Some(text)) => text,
            Ok(None) => REDACTION_MARKER.to_string(),
            Err(e) => {
                warn!("Pipeline failure, output redacted: {}", e);
                REDACTION_MARKER.to_string()
            }
        }
    }

    /// Applies the pipeline to every string key and value of a payload.
    pub fn apply_value(&self, value: Value, ctx: &StageContext<'_>) -> Value {
        self.apply_value_under(value, ctx, None)
    }

    fn apply_value_under(&self, value: Value, ctx: &StageContext<'_>, key: Option<&str>) -> Value {
        match value {
            Value::String(text) => {
                let field_ctx = ctx.with_field(FieldKind::PayloadValue { key });
                Value::String(self.apply(&text, &field_ctx))
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.apply_value_under(item, ctx, key))
                    .collect(),
            ),
            Value::Object(entries) => {
                let mut out = Map::with_capacity(entries.len());
                for (raw_key, item) in entries {
                    let item = self.apply_value_under(item, ctx, Some(&raw_key));
                    out.insert(unique_key(&out, ControlSanitizer::sanitize(&raw_key)), item);
                }
                Value::Object(out)
            }
            scalar => scalar,
        }
    }
}

/// Keys are only sanitized, never transformed, so distinct keys stay
/// distinct. Two keys can still meet after escaping; the later one gets a
/// `#n` suffix.
fn unique_key(out: &Map<String, Value>, key: String) -> String {
    if !out.contains_key(&key) {
        return key;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}#{}", key, n);
        if !out.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}


impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}
