use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::config::RenderConfig;
use crate::models::{HostOutcome, HostResult, HostTally, Notice, NoticeKind, RenderSnapshot, TaskId, TaskRecord, TaskStatus};

use super::detail::{censored, detail_lines, detail_level, shape, NO_LOG_VERBOSITY};
use super::diff::diff_lines;
use super::format::{fit_line, format_elapsed, single_line, spinner_frame};
use super::frame::{Frame, Line, Tone};

pub const SYMBOL_OK: &str = "✔";
pub const SYMBOL_CHANGED: &str = "⚙";
pub const SYMBOL_SKIPPED: &str = "⏭";
pub const SYMBOL_FAILED: &str = "✘";
pub const SYMBOL_UNREACHABLE: &str = "🖧";

/// Which results reach the scrollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPolicy {
    pub verbosity: u8,
    pub display_ok_hosts: bool,
    pub display_skipped_hosts: bool,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            verbosity: 0,
            display_ok_hosts: true,
            display_skipped_hosts: false,
        }
    }
}

impl DisplayPolicy {
    pub fn shows(&self, outcome: HostOutcome) -> bool {
        match outcome {
            HostOutcome::Failed | HostOutcome::Unreachable | HostOutcome::Changed => true,
            HostOutcome::Ok => self.display_ok_hosts || self.verbosity >= 2,
            HostOutcome::Skipped => self.display_skipped_hosts || self.verbosity >= 2,
        }
    }

    fn shows_status(&self, status: TaskStatus) -> bool {
        match status {
            TaskStatus::Ok => self.shows(HostOutcome::Ok),
            TaskStatus::Skipped => self.shows(HostOutcome::Skipped),
            _ => true,
        }
    }
}

/// What already reached the scrollback for tasks that are still running,
/// and the last group header printed. The composer returns the next state
/// with each frame; the caller keeps it only once the frame is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintState {
    announced: HashSet<TaskId>,
    printed: HashMap<TaskId, usize>,
    group: Option<String>,
}

impl PrintState {
    pub fn is_announced(&self, id: &TaskId) -> bool {
        self.announced.contains(id)
    }

    /// Host results of a running task already printed.
    pub fn printed(&self, id: &TaskId) -> usize {
        self.printed.get(id).copied().unwrap_or(0)
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

/// Maps registry snapshots to frames. Holds no mutable state and performs
/// no I/O; the caller supplies the clock.
#[derive(Debug, Clone)]
pub struct Composer {
    width: usize,
    slots: usize,
    policy: DisplayPolicy,
}

impl Composer {
    pub fn new(width: usize, slots: usize) -> Self {
        Self {
            width,
            slots: slots.max(1),
            policy: DisplayPolicy::default(),
        }
    }

    pub fn from_config(config: &RenderConfig, width: u16) -> Self {
        Self::new(width as usize, config.slots).with_policy(DisplayPolicy {
            verbosity: config.verbosity,
            display_ok_hosts: config.display_ok_hosts,
            display_skipped_hosts: config.display_skipped_hosts,
        })
    }

    pub fn with_policy(mut self, policy: DisplayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn compose(&self, snapshot: &RenderSnapshot, now: Instant, printed: &PrintState) -> (Frame, PrintState) {
        let mut state = printed.clone();
        let scrollback = self.fit_all(self.history(snapshot, &mut state));
        let frame = Frame {
            scrollback,
            live: self.live_region(snapshot, now),
        };
        (frame, state)
    }

    /// Line output for terminals that cannot redraw: history, a start line per
    /// newly running task, then results of running tasks not printed yet.
    pub fn compose_lines(
        &self,
        snapshot: &RenderSnapshot,
        clock: DateTime<Local>,
        printed: &PrintState,
    ) -> (Vec<Line>, PrintState) {
        let mut state = printed.clone();
        let mut lines = self.history(snapshot, &mut state);
        for record in sorted_running(snapshot) {
            if state.announced.insert(record.id.clone()) {
                lines.push(self.started_line(record, clock));
            }
            lines.extend(self.unprinted_lines(record, &mut state));
        }
        (self.fit_all(lines), state)
    }

    /// Last frame of a run: remaining scrollback, tasks cut short with the
    /// results they had, and the recap. The live region is left empty.
    pub fn compose_final(&self, snapshot: &RenderSnapshot, now: Instant, printed: &PrintState) -> (Frame, PrintState) {
        let mut state = printed.clone();
        let mut scrollback = self.history(snapshot, &mut state);
        for record in sorted_running(snapshot) {
            scrollback.extend(self.unprinted_lines(record, &mut state));
            scrollback.push(
                Line::toned(Tone::Muted, format!("{} {} - interrupted - ", SYMBOL_FAILED, record.name))
                    .with(Tone::Time, format_elapsed(record.elapsed(now))),
            );
        }
        scrollback.extend(self.recap_lines(snapshot, now));
        let frame = Frame {
            scrollback: self.fit_all(scrollback),
            live: vec![],
        };
        (frame, state)
    }

    /// Notices and completed tasks in sequence order. Results already
    /// printed while a task was running are skipped.
    fn history(&self, snapshot: &RenderSnapshot, state: &mut PrintState) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut notices = snapshot.notices.iter().peekable();
        for entry in &snapshot.completed {
            while let Some(notice) = notices.next_if(|notice| notice.seq < entry.seq) {
                lines.extend(self.notice_lines(notice, state));
            }
            let skip = state.printed.remove(&entry.record.id).unwrap_or(0);
            state.announced.remove(&entry.record.id);
            lines.extend(self.record_lines(&entry.record, skip, state));
        }
        for notice in notices {
            lines.extend(self.notice_lines(notice, state));
        }
        lines
    }

    fn unprinted_lines(&self, record: &TaskRecord, state: &mut PrintState) -> Vec<Line> {
        let skip = state.printed(&record.id);
        let total = record.host_results.len();
        if total <= skip {
            return vec![];
        }
        state.printed.insert(record.id.clone(), total);
        self.record_lines(record, skip, state)
    }

    fn notice_lines(&self, notice: &Notice, state: &mut PrintState) -> Vec<Line> {
        match &notice.kind {
            NoticeKind::RunBanner { name, check_mode } => {
                if name.is_none() && !check_mode {
                    return vec![];
                }
                let title = match name {
                    Some(name) => format!("- Run - {} -", single_line(name)),
                    None => "- Run -".to_string(),
                };
                let mut line = Line::toned(Tone::Time, stamp(Some(notice.clock))).with(Tone::Heading, title);
                if *check_mode {
                    line = line.with(Tone::Muted, " Check Mode");
                }
                vec![line]
            }
            NoticeKind::Retry {
                task,
                group,
                host,
                retries_left,
            } => {
                let line = Line::toned(Tone::Time, stamp(Some(notice.clock)))
                    .with(Tone::Skipped, format!("{} - {} - ", host, single_line(task)))
                    .with(
                        Tone::Bold,
                        format!("Failed - Retrying... ({} retries left)", retries_left),
                    );
                self.with_group_header(group.as_deref(), Some(notice.clock), vec![line], state)
            }
        }
    }

    fn with_group_header(
        &self,
        group: Option<&str>,
        clock: Option<DateTime<Local>>,
        lines: Vec<Line>,
        state: &mut PrintState,
    ) -> Vec<Line> {
        match group {
            Some(group) if !lines.is_empty() && state.group.as_deref() != Some(group) => {
                state.group = Some(group.to_string());
                let header = Line::toned(Tone::Time, stamp(clock))
                    .with(Tone::Bold, format!("--- Role - {} ---", single_line(group)));
                std::iter::once(header).chain(lines).collect()
            }
            _ => lines,
        }
    }

    fn fit_all(&self, lines: Vec<Line>) -> Vec<Line> {
        lines.into_iter().map(|line| fit_line(line, self.width)).collect()
    }

    /// Rows of the in-place region, oldest-running first. When more tasks run
    /// than there are slots, the last slot summarizes the hidden ones.
    pub fn live_region(&self, snapshot: &RenderSnapshot, now: Instant) -> Vec<Line> {
        let running = sorted_running(snapshot);
        if running.is_empty() && snapshot.pending == 0 {
            return vec![];
        }

        let mut lines = vec![self.live_header(snapshot, running.len(), now)];
        let visible = if running.len() > self.slots {
            self.slots - 1
        } else {
            running.len()
        };
        for record in running.iter().take(visible) {
            lines.push(fit_line(self.running_row(record, now), self.width));
        }
        let hidden = running.len() - visible;
        if hidden > 0 {
            lines.push(Line::toned(Tone::Muted, format!("  … {} more running", hidden)));
        }
        lines
    }

    fn live_header(&self, snapshot: &RenderSnapshot, running: usize, now: Instant) -> Line {
        let mut text = format!("{} running", running);
        if snapshot.pending > 0 {
            text.push_str(&format!(", {} queued", snapshot.pending));
        }
        if let Some(name) = &snapshot.run_name {
            text = format!("{} - {}", single_line(name), text);
        }
        let mut line = Line::toned(Tone::Heading, text);
        if let Some(started) = snapshot.run_started_at {
            line = line
                .with(Tone::Plain, " - ")
                .with(Tone::Time, format_elapsed(now.saturating_duration_since(started)));
        }
        fit_line(line, self.width)
    }

    fn running_row(&self, record: &TaskRecord, now: Instant) -> Line {
        let elapsed = record.elapsed(now);
        let mut line = Line::toned(Tone::Time, format!("{} ", spinner_frame(elapsed)))
            .with(Tone::Bold, single_line(&record.name));
        let reported = record.host_results.len();
        if reported > 0 {
            let failed = record.host_results.iter().filter(|r| r.outcome.is_failure()).count();
            line = line.with(
                Tone::Muted,
                format!(" - {} host{}", reported, if reported == 1 { "" } else { "s" }),
            );
            if failed > 0 {
                line = line.with(Tone::Failed, format!(", {} failed", failed));
            }
        }
        line.with(Tone::Plain, " - ").with(Tone::Time, format_elapsed(elapsed))
    }

    /// One line announcing a task start, used when redrawing is unavailable.
    pub fn started_line(&self, record: &TaskRecord, clock: DateTime<Local>) -> Line {
        Line::toned(Tone::Time, stamp(Some(clock)))
            .with(Tone::Bold, single_line(&record.name))
            .with(Tone::Muted, " - started")
    }

    /// Scrollback lines of a finished task printed in one go.
    pub fn completed_lines(&self, record: &TaskRecord) -> Vec<Line> {
        self.record_lines(record, 0, &mut PrintState::default())
    }

    /// Lines for the host results of `record` past `skip`, plus the task line
    /// of a finished task that reported none.
    fn record_lines(&self, record: &TaskRecord, skip: usize, state: &mut PrintState) -> Vec<Line> {
        let mut lines: Vec<Line> = record
            .host_results
            .iter()
            .skip(skip)
            .flat_map(|result| self.result_lines(record, result))
            .collect();
        if record.status.is_terminal() && record.host_results.is_empty() && self.policy.shows_status(record.status) {
            lines.push(self.task_line(record));
        }
        let clock = record
            .host_results
            .get(skip)
            .map(|result| result.received_at)
            .or(record.finished_clock);
        self.with_group_header(record.group.as_deref(), clock, lines, state)
    }

    fn result_lines(&self, record: &TaskRecord, result: &HostResult) -> Vec<Line> {
        if !self.policy.shows(result.outcome) {
            return vec![];
        }
        let mut lines = vec![self.host_line(record, result)];
        let hidden = result.no_log && self.policy.verbosity < NO_LOG_VERBOSITY;
        if result.outcome == HostOutcome::Changed && !hidden {
            lines.extend(diff_lines(&result.payload));
        }
        let level = detail_level(result.outcome, self.policy.verbosity);
        let detail = if hidden {
            censored(level)
        } else {
            shape(&result.payload, level, self.policy.verbosity)
        };
        if let Some(detail) = detail {
            lines.extend(
                detail_lines(&detail, self.width)
                    .into_iter()
                    .map(|text| Line::toned(Tone::Muted, text)),
            );
        }
        lines
    }

    fn host_line(&self, record: &TaskRecord, result: &HostResult) -> Line {
        let (symbol, tone) = outcome_style(result.outcome);
        let mut text = format!("{} {} - {}", symbol, result.host, record.name);
        if result.outcome != HostOutcome::Ok {
            text.push_str(&format!(" - {}", result.outcome.label()));
        }
        Line::toned(Tone::Time, stamp(Some(result.received_at)))
            .with(tone, text)
            .with(Tone::Plain, " - ")
            .with(Tone::Time, format_elapsed(result.elapsed))
    }

    fn task_line(&self, record: &TaskRecord) -> Line {
        let (symbol, tone) = status_style(record.status);
        let mut text = format!("{} {}", symbol, record.name);
        if record.status != TaskStatus::Ok {
            text.push_str(&format!(" - {}", record.status.label()));
        }
        let elapsed = match (record.started_at, record.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Default::default(),
        };
        Line::toned(Tone::Time, stamp(record.finished_clock))
            .with(tone, text)
            .with(Tone::Plain, " - ")
            .with(Tone::Time, format_elapsed(elapsed))
    }

    pub fn recap_lines(&self, snapshot: &RenderSnapshot, now: Instant) -> Vec<Line> {
        let mut lines = vec![Line::plain("")];
        let mut heading = Line::toned(Tone::Heading, "Play Recap");
        if let Some(started) = snapshot.run_started_at {
            heading = heading
                .with(Tone::Plain, " - ")
                .with(Tone::Time, format_elapsed(now.saturating_duration_since(started)));
        }
        lines.push(heading);
        if snapshot.tallies.is_empty() {
            return lines;
        }

        let host_width = snapshot
            .tallies
            .keys()
            .map(|host| unicode_width::UnicodeWidthStr::width(host.as_str()))
            .max()
            .unwrap_or(0)
            .max(4);
        lines.push(Line::toned(
            Tone::Bold,
            format!(
                "{:>w$}  {:>5}  {:>7}  {:>11}  {:>6}  {:>7}",
                "host",
                "ok",
                "changed",
                "unreachable",
                "failed",
                "skipped",
                w = host_width
            ),
        ));
        for (host, tally) in &snapshot.tallies {
            let pad = host_width.saturating_sub(unicode_width::UnicodeWidthStr::width(host.as_str()));
            lines.push(
                Line::plain(" ".repeat(pad))
                    .with(recap_tone(tally), host.clone())
                    .with(
                        Tone::Plain,
                        format!(
                            "  {:>5}  {:>7}  {:>11}  {:>6}  {:>7}",
                            tally.ok, tally.changed, tally.unreachable, tally.failed, tally.skipped
                        ),
                    ),
            );
        }
        lines
    }
}

fn stamp(clock: Option<DateTime<Local>>) -> String {
    match clock {
        Some(clock) => format!("[{}] ", clock.format("%H:%M:%S")),
        None => "[--:--:--] ".to_string(),
    }
}

fn sorted_running(snapshot: &RenderSnapshot) -> Vec<&TaskRecord> {
    let mut running: Vec<&TaskRecord> = snapshot.running.iter().collect();
    // stable sort keeps insertion order between equal start times
    running.sort_by_key(|record| record.started_at);
    running
}

fn outcome_style(outcome: HostOutcome) -> (&'static str, Tone) {
    match outcome {
        HostOutcome::Ok => (SYMBOL_OK, Tone::Ok),
        HostOutcome::Changed => (SYMBOL_CHANGED, Tone::Changed),
        HostOutcome::Failed => (SYMBOL_FAILED, Tone::Failed),
        HostOutcome::Skipped => (SYMBOL_SKIPPED, Tone::Skipped),
        HostOutcome::Unreachable => (SYMBOL_UNREACHABLE, Tone::Unreachable),
    }
}

fn status_style(status: TaskStatus) -> (&'static str, Tone) {
    match status {
        TaskStatus::Failed => (SYMBOL_FAILED, Tone::Failed),
        TaskStatus::Skipped => (SYMBOL_SKIPPED, Tone::Skipped),
        TaskStatus::Unreachable => (SYMBOL_UNREACHABLE, Tone::Unreachable),
        _ => (SYMBOL_OK, Tone::Ok),
    }
}

fn recap_tone(tally: &HostTally) -> Tone {
    if tally.has_failures() {
        Tone::Failed
    } else if tally.changed > 0 {
        Tone::Changed
    } else {
        Tone::Ok
    }
}
