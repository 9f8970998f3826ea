//! Result detail shown under a scrollback line.
//!
//! Payloads arrive already sanitized; this only decides which fields are
//! worth printing and lays them out as YAML.

use serde_json::{json, Map, Value};

use crate::models::HostOutcome;

const LOOP_SUMMARY_MSG: &str = "All items completed";
const OMITTED: &str = "<omitted>";
pub const CENSORED_MSG: &str =
    "the output has been hidden due to the fact that 'no_log: true' was specified for this result";
/// Verbosity from which `no_log` results and diffs are printed anyway.
pub const NO_LOG_VERBOSITY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    None,
    /// `stdout`, `stderr` and `msg` only.
    Reduced,
    /// Everything except internal and redundant fields.
    Comprehensive,
}

pub fn detail_level(outcome: HostOutcome, verbosity: u8) -> DetailLevel {
    if verbosity >= 4 || outcome == HostOutcome::Failed {
        DetailLevel::Comprehensive
    } else if verbosity >= 1 || outcome == HostOutcome::Changed {
        DetailLevel::Reduced
    } else {
        DetailLevel::None
    }
}

/// Returns the part of `payload` to print, or `None` when nothing is left.
pub fn shape(payload: &Value, level: DetailLevel, verbosity: u8) -> Option<Value> {
    let shaped = match level {
        DetailLevel::None => return None,
        DetailLevel::Reduced => reduced(payload),
        DetailLevel::Comprehensive => comprehensive(payload, verbosity),
    };
    match &shaped {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::String(text) if text.is_empty() => None,
        _ => Some(shaped),
    }
}

/// Stand-in detail for a `no_log` result at the given level.
pub fn censored(level: DetailLevel) -> Option<Value> {
    match level {
        DetailLevel::None => None,
        DetailLevel::Reduced | DetailLevel::Comprehensive => Some(json!({ "censored": CENSORED_MSG })),
    }
}

fn reduced(payload: &Value) -> Value {
    let Value::Object(map) = payload else {
        return payload.clone();
    };
    let mut out = Map::new();
    for key in ["stdout", "stderr"] {
        if let Some(value) = map.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    match map.get("msg") {
        Some(Value::String(msg)) if msg == LOOP_SUMMARY_MSG => {}
        Some(msg) => {
            out.insert("msg".to_string(), msg.clone());
        }
        None => {}
    }
    Value::Object(out)
}

fn comprehensive(payload: &Value, verbosity: u8) -> Value {
    let Value::Object(map) = payload else {
        return payload.clone();
    };
    let mut out = Map::new();
    for (key, value) in map {
        if key.starts_with('_') {
            continue;
        }
        if key == "invocation" && verbosity < 4 {
            continue;
        }
        if (key == "diff" || key == "skipped") && verbosity < 3 {
            continue;
        }
        out.insert(key.clone(), value.clone());
    }
    for (full, split) in [("stdout", "stdout_lines"), ("stderr", "stderr_lines")] {
        if out.contains_key(full) && out.contains_key(split) {
            out.insert(split.to_string(), Value::String(OMITTED.to_string()));
        }
    }
    Value::Object(out)
}

pub fn to_yaml(value: &Value) -> String {
    match serde_yaml::to_string(value) {
        Ok(yaml) => yaml,
        Err(_) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    }
}

/// YAML rendering of `value`, indented under its scrollback line and wrapped
/// to `width` columns.
pub fn detail_lines(value: &Value, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in to_yaml(value).lines() {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let indent = " ".repeat(2 + raw.len() - trimmed.len());
        let continuation = format!("{}  ", indent);
        let wrap_width = width.max(continuation.len() + 10);
        let options = textwrap::Options::new(wrap_width)
            .initial_indent(&indent)
            .subsequent_indent(&continuation);
        lines.extend(textwrap::wrap(trimmed, options).into_iter().map(|line| line.into_owned()));
    }
    lines
}
