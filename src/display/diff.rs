//! Before/after diffs printed under changed results.
//!
//! A result carries its diff under `diff`, either one entry or a list of
//! them. An entry holds `before`/`after` (text or structured values, with
//! optional `before_header`/`after_header`) or an already `prepared` diff.
//! Loop results carry one payload per item under `results`.

use std::ops::Range;

use serde_json::Value;

use super::detail::to_yaml;
use super::format::single_line;
use super::frame::{Line, Tone};

const CONTEXT: usize = 3;
/// Above this many compared line pairs the diff degrades to remove-all/add-all.
const MAX_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit<'a> {
    Keep(&'a str),
    Remove(&'a str),
    Add(&'a str),
}

impl Edit<'_> {
    fn in_before(&self) -> bool {
        !matches!(self, Edit::Add(_))
    }

    fn in_after(&self) -> bool {
        !matches!(self, Edit::Remove(_))
    }
}

/// Diff lines for a changed result's payload. Empty when it has none.
pub fn diff_lines(payload: &Value) -> Vec<Line> {
    if let Some(Value::Array(items)) = payload.get("results") {
        return items
            .iter()
            .filter(|item| item.get("changed").and_then(Value::as_bool).unwrap_or(false))
            .flat_map(own_diff_lines)
            .collect();
    }
    own_diff_lines(payload)
}

fn own_diff_lines(payload: &Value) -> Vec<Line> {
    match payload.get("diff") {
        Some(Value::Array(entries)) => entries.iter().flat_map(entry_lines).collect(),
        Some(entry) => entry_lines(entry),
        None => vec![],
    }
}

fn entry_lines(entry: &Value) -> Vec<Line> {
    if let Some(prepared) = entry.get("prepared").and_then(Value::as_str) {
        return prepared
            .trim_matches(|c| c == ' ' || c == '\n')
            .lines()
            .map(|line| Line::toned(prepared_tone(line), single_line(line)))
            .collect();
    }
    if entry.get("before").is_none() && entry.get("after").is_none() {
        return vec![];
    }
    let before = side_text(entry.get("before"));
    let after = side_text(entry.get("after"));
    if before == after {
        return vec![];
    }

    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    let edits = edits(&before_lines, &after_lines);

    let mut lines = vec![
        Line::toned(Tone::Failed, format!("--- {}", header(entry, "before_header", "before"))),
        Line::toned(Tone::Ok, format!("+++ {}", header(entry, "after_header", "after"))),
    ];
    for range in hunks(&edits) {
        lines.push(Line::toned(Tone::Muted, hunk_header(&edits, range.clone())));
        for edit in &edits[range] {
            lines.push(match edit {
                Edit::Keep(text) => Line::plain(format!(" {}", single_line(text))),
                Edit::Remove(text) => Line::toned(Tone::Failed, format!("-{}", single_line(text))),
                Edit::Add(text) => Line::toned(Tone::Ok, format!("+{}", single_line(text))),
            });
        }
    }
    lines
}

fn side_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => to_yaml(other),
    }
}

fn header(entry: &Value, key: &str, default: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(single_line)
        .unwrap_or_else(|| default.to_string())
}

fn prepared_tone(line: &str) -> Tone {
    if line.starts_with("@@") {
        Tone::Muted
    } else if line.starts_with('+') {
        Tone::Ok
    } else if line.starts_with('-') {
        Tone::Failed
    } else {
        Tone::Plain
    }
}

/// Line edit script via longest common subsequence.
fn edits<'a>(before: &[&'a str], after: &[&'a str]) -> Vec<Edit<'a>> {
    let (n, m) = (before.len(), after.len());
    if n.saturating_mul(m) > MAX_CELLS {
        return before
            .iter()
            .map(|line| Edit::Remove(line))
            .chain(after.iter().map(|line| Edit::Add(line)))
            .collect();
    }

    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if before[i] == after[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(n + m);
    while i < n && j < m {
        if before[i] == after[j] {
            out.push(Edit::Keep(before[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(Edit::Remove(before[i]));
            i += 1;
        } else {
            out.push(Edit::Add(after[j]));
            j += 1;
        }
    }
    out.extend(before[i..].iter().map(|line| Edit::Remove(line)));
    out.extend(after[j..].iter().map(|line| Edit::Add(line)));
    out
}

/// Changed regions widened by the context lines; overlapping ones merge.
fn hunks(edits: &[Edit<'_>]) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (idx, _) in edits.iter().enumerate().filter(|(_, edit)| !matches!(edit, Edit::Keep(_))) {
        let start = idx.saturating_sub(CONTEXT);
        let end = (idx + CONTEXT + 1).min(edits.len());
        match ranges.last_mut() {
            Some(last) if start <= last.end => last.end = last.end.max(end),
            _ => ranges.push(start..end),
        }
    }
    ranges
}

fn hunk_header(edits: &[Edit<'_>], range: Range<usize>) -> String {
    let old_start = edits[..range.start].iter().filter(|edit| edit.in_before()).count();
    let new_start = edits[..range.start].iter().filter(|edit| edit.in_after()).count();
    let old_len = edits[range.clone()].iter().filter(|edit| edit.in_before()).count();
    let new_len = edits[range].iter().filter(|edit| edit.in_after()).count();
    // an empty side points at the line before the hunk
    let old_start = if old_len == 0 { old_start } else { old_start + 1 };
    let new_start = if new_len == 0 { new_start } else { new_start + 1 };
    format!("@@ -{},{} +{},{} @@", old_start, old_len, new_start, new_len)
}
