use std::time::Duration;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::frame::{Line, Span};

const ELLIPSIS: char = '…';
const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// `.123` below one second, `H:MM:SS.mmm` otherwise.
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.subsec_millis();
    let total = elapsed.as_secs();
    if total == 0 {
        return format!(".{:03}", millis);
    }
    let hours = total / 3600;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

pub fn spinner_frame(elapsed: Duration) -> char {
    SPINNER[(elapsed.as_millis() / 100) as usize % SPINNER.len()]
}

/// Collapses line breaks and tabs so the text occupies exactly one row.
pub fn single_line(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\t' { ' ' } else { c })
        .collect()
}

/// Cuts `text` to at most `width` display columns, ending with an ellipsis
/// when anything was removed.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    cut_with_ellipsis(text, width)
}

fn cut_with_ellipsis(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let budget = width - 1;
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push(ELLIPSIS);
    out
}

/// Truncates a styled line to `width` columns, dropping spans past the edge.
pub fn fit_line(line: Line, width: usize) -> Line {
    let total: usize = line.spans.iter().map(|span| span.text.width()).sum();
    if total <= width {
        return line;
    }

    let mut remaining = width;
    let mut spans = Vec::with_capacity(line.spans.len());
    for span in line.spans {
        if remaining == 0 {
            break;
        }
        let w = span.text.width();
        if w < remaining {
            remaining -= w;
            spans.push(span);
        } else {
            // the span that reaches the edge carries the ellipsis
            let text = cut_with_ellipsis(&span.text, remaining);
            spans.push(Span { tone: span.tone, text });
            remaining = 0;
        }
    }
    Line { spans }
}
