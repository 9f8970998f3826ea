use crossterm::style::Color;

use super::frame::Tone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub fg: Option<Color>,
    pub bold: bool,
}

impl Style {
    const fn fg(color: Color) -> Self {
        Self {
            fg: Some(color),
            bold: false,
        }
    }

    const fn bold() -> Self {
        Self { fg: None, bold: true }
    }

    pub fn is_plain(&self) -> bool {
        self.fg.is_none() && !self.bold
    }
}

/// Maps tones to terminal styles. Built once and handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub ok: Style,
    pub changed: Style,
    pub failed: Style,
    pub skipped: Style,
    pub unreachable: Style,
    pub time: Style,
    pub muted: Style,
    pub heading: Style,
    pub bold: Style,
}

impl Theme {
    pub fn monochrome() -> Self {
        Self {
            ok: Style::default(),
            changed: Style::default(),
            failed: Style::default(),
            skipped: Style::default(),
            unreachable: Style::default(),
            time: Style::default(),
            muted: Style::default(),
            heading: Style::default(),
            bold: Style::default(),
        }
    }

    pub fn style(&self, tone: Tone) -> Style {
        match tone {
            Tone::Plain => Style::default(),
            Tone::Bold => self.bold,
            Tone::Muted => self.muted,
            Tone::Time => self.time,
            Tone::Heading => self.heading,
            Tone::Ok => self.ok,
            Tone::Changed => self.changed,
            Tone::Failed => self.failed,
            Tone::Skipped => self.skipped,
            Tone::Unreachable => self.unreachable,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            ok: Style::fg(Color::Green),
            changed: Style::fg(Color::Yellow),
            failed: Style::fg(Color::Red),
            skipped: Style::fg(Color::Blue),
            unreachable: Style::fg(Color::Red),
            time: Style::fg(Color::Green),
            muted: Style::fg(Color::DarkGrey),
            heading: Style {
                fg: None,
                bold: true,
            },
            bold: Style::bold(),
        }
    }
}
