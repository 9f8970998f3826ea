use crate::error::PipelineError;

use super::stage::{FieldKind, Stage, StageContext, StageOutput};

pub const PLACEHOLDER_TEXT: &str = "LTR-PLACEHOLDER";
pub const SECRET_MASK: &str = "********";

const SENSITIVE_KEY_MARKERS: [&str; 6] = ["password", "passwd", "secret", "token", "api_key", "private_key"];

/// Escapes terminal control characters so task output cannot move the cursor,
/// clear the screen or ring the bell. Tab and line feed are kept: neither can
/// overwrite anything already on screen.
pub struct ControlSanitizer;

impl ControlSanitizer {
    fn replacement(c: char) -> Option<String> {
        let named = match c {
            '\u{07}' => Some("<BEL>"),
            '\u{08}' => Some("<BS>"),
            '\u{0C}' => Some("<FF>"),
            '\r' => Some("<CR>"),
            '\u{1B}' => Some("<ESC>"),
            '\u{7F}' => Some("<DEL>"),
            _ => None,
        };
        if let Some(name) = named {
            return Some(name.to_string());
        }
        match c {
            '\t' | '\n' => None,
            '\u{00}'..='\u{1F}' | '\u{80}'..='\u{9F}' => Some(format!("<0x{:02X}>", c as u32)),
            _ => None,
        }
    }

    pub fn sanitize(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match Self::replacement(c) {
                Some(escaped) => out.push_str(&escaped),
                None => out.push(c),
            }
        }
        out
    }
}

impl Stage for ControlSanitizer {
    fn name(&self) -> &str {
        "sanitize"
    }

    fn apply(&self, text: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, PipelineError> {
        Ok(StageOutput::Text(Self::sanitize(text)))
    }
}

pub struct Identity;

impl Stage for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, text: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, PipelineError> {
        Ok(StageOutput::Text(text.to_string()))
    }
}

/// Replaces every string with a fixed text. Handy to confirm which output
/// actually flows through the pipeline.
pub struct Placeholder;

impl Stage for Placeholder {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn apply(&self, _text: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, PipelineError> {
        Ok(StageOutput::Text(PLACEHOLDER_TEXT.to_string()))
    }
}

/// Masks occurrences of known secret values anywhere in the text.
pub struct SecretMask {
    secrets: Vec<String>,
}

impl SecretMask {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        let mut secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        // longest first so a secret that contains another is masked whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self { secrets }
    }
}

impl Stage for SecretMask {
    fn name(&self) -> &str {
        "mask-secrets"
    }

    fn apply(&self, text: &str, _ctx: &StageContext<'_>) -> Result<StageOutput, PipelineError> {
        let mut current = text.to_string();
        for secret in &self.secrets {
            if current.contains(secret.as_str()) {
                current = current.replace(secret.as_str(), SECRET_MASK);
            }
        }
        Ok(StageOutput::Text(current))
    }
}

/// Redacts payload values stored under secret-bearing keys.
pub struct SensitiveKeys;

impl SensitiveKeys {
    pub fn is_sensitive(key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        SENSITIVE_KEY_MARKERS.iter().any(|marker| key.contains(marker))
    }
}

impl Stage for SensitiveKeys {
    fn name(&self) -> &str {
        "sensitive-keys"
    }

    fn apply(&self, text: &str, ctx: &StageContext<'_>) -> Result<StageOutput, PipelineError> {
        match ctx.field {
            FieldKind::PayloadValue { key: Some(key) } if Self::is_sensitive(key) => Ok(StageOutput::Redact),
            _ => Ok(StageOutput::Text(text.to_string())),
        }
    }
}
