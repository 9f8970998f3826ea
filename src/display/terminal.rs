use std::io::{self, Stdout, Write};

use crossterm::{
    cursor::{Hide, MoveToColumn, MoveUp, Show},
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{self, Clear, ClearType},
};

use crate::config::{RenderConfig, DEFAULT_WIDTH};
use crate::error::FatalError;

use super::frame::{Frame, Line};
use super::theme::Theme;

/// Where frames end up. The render loop is the only caller.
pub trait FrameSink: Send {
    /// Prints `frame.scrollback` as permanent lines, then replaces the
    /// previous live region with `frame.live`.
    fn redraw(&mut self, frame: &Frame) -> io::Result<()>;

    /// Appends lines without touching anything already printed.
    fn append(&mut self, lines: &[Line]) -> io::Result<()>;

    /// Clears the live region and restores the cursor.
    fn release(&mut self) -> io::Result<()>;
}

pub struct TerminalSink<W: Write + Send> {
    out: W,
    theme: Theme,
    /// Rows written since the last committed frame. The next write moves
    /// back over them, so a redraw that failed halfway leaves nothing behind.
    live_height: u16,
    cursor_hidden: bool,
}

impl TerminalSink<Stdout> {
    pub fn stdout(theme: Theme) -> Self {
        Self::new(io::stdout(), theme)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, theme: Theme) -> Self {
        Self {
            out,
            theme,
            live_height: 0,
            cursor_hidden: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn clear_live(&mut self) -> io::Result<()> {
        queue!(self.out, MoveToColumn(0))?;
        // MoveUp(0) still moves one row on some terminals
        if self.live_height > 0 {
            queue!(self.out, MoveUp(self.live_height))?;
        }
        queue!(self.out, Clear(ClearType::FromCursorDown))?;
        self.live_height = 0;
        Ok(())
    }

    fn write_line(&mut self, line: &Line) -> io::Result<()> {
        for span in &line.spans {
            let style = self.theme.style(span.tone);
            if style.is_plain() {
                queue!(self.out, Print(&span.text))?;
                continue;
            }
            if let Some(color) = style.fg {
                queue!(self.out, SetForegroundColor(color))?;
            }
            if style.bold {
                queue!(self.out, SetAttribute(Attribute::Bold))?;
            }
            queue!(self.out, Print(&span.text), SetAttribute(Attribute::Reset), ResetColor)?;
        }
        queue!(self.out, Print("\n"))
    }
}

impl<W: Write + Send> FrameSink for TerminalSink<W> {
    fn redraw(&mut self, frame: &Frame) -> io::Result<()> {
        if !self.cursor_hidden {
            queue!(self.out, Hide)?;
            self.cursor_hidden = true;
        }
        self.clear_live()?;
        for line in frame.scrollback.iter().chain(&frame.live) {
            self.write_line(line)?;
            self.live_height = self.live_height.saturating_add(1);
        }
        self.out.flush()?;
        self.live_height = u16::try_from(frame.live.len()).unwrap_or(u16::MAX);
        Ok(())
    }

    fn append(&mut self, lines: &[Line]) -> io::Result<()> {
        // leftovers of a live region abandoned for line output
        if self.live_height > 0 {
            self.clear_live()?;
        }
        for line in lines {
            self.write_line(line)?;
        }
        self.out.flush()
    }

    fn release(&mut self) -> io::Result<()> {
        self.clear_live()?;
        if self.cursor_hidden {
            queue!(self.out, Show)?;
            self.cursor_hidden = false;
        }
        queue!(self.out, ResetColor)?;
        self.out.flush()
    }
}

pub fn stdout_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 }
}

pub fn stderr_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDERR_FILENO) == 1 }
}

/// Checks that stdout can host a live region and returns its width.
pub fn acquire(config: &RenderConfig) -> Result<u16, FatalError> {
    acquire_with(config, stdout_is_tty())
}

/// [`acquire`] with the terminal check already made.
pub fn acquire_with(config: &RenderConfig, is_tty: bool) -> Result<u16, FatalError> {
    if !config.force_interactive && !is_tty {
        return Err(FatalError::NotInteractive);
    }
    if let Some(width) = config.width {
        return Ok(width);
    }
    match terminal::size() {
        Ok((columns, _)) => Ok(columns),
        Err(_) if config.force_interactive => Ok(DEFAULT_WIDTH),
        Err(e) => Err(FatalError::TerminalUnavailable(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::frame::Tone;

    fn frame(scrollback: &[&str], live: &[&str]) -> Frame {
        Frame {
            scrollback: scrollback.iter().map(|s| Line::plain(*s)).collect(),
            live: live.iter().map(|s| Line::plain(*s)).collect(),
        }
    }

    fn output(sink: TerminalSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    /// Accepts a fixed number of line breaks, then fails every write.
    struct FlakyWriter {
        written: Vec<u8>,
        newlines_left: usize,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let newlines = buf.iter().filter(|b| **b == b'\n').count();
            if newlines > self.newlines_left {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"));
            }
            self.newlines_left -= newlines;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_first_redraw_does_not_move_up() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::monochrome());
        sink.redraw(&frame(&["done"], &["live 1", "live 2"])).unwrap();
        let out = output(sink);
        assert!(!out.contains("\u{1b}[1A"));
        assert!(out.contains("done\nlive 1\nlive 2\n"));
    }

    #[test]
    fn test_second_redraw_moves_over_previous_live_region() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::monochrome());
        sink.redraw(&frame(&[], &["a", "b", "c"])).unwrap();
        sink.redraw(&frame(&[], &["a"])).unwrap();
        let out = output(sink);
        assert!(out.contains("\u{1b}[3A"));
    }

    #[test]
    fn test_append_never_moves_cursor() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::monochrome());
        sink.append(&[Line::plain("one"), Line::plain("two")]).unwrap();
        assert_eq!(output(sink), "one\ntwo\n");
    }

    #[test]
    fn test_release_shows_cursor() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::monochrome());
        sink.redraw(&frame(&[], &["x"])).unwrap();
        sink.release().unwrap();
        let out = output(sink);
        assert!(out.contains("\u{1b}[?25l"));
        assert!(out.ends_with("\u{1b}[?25h\u{1b}[0m"));
    }

    #[test]
    fn test_colored_spans_are_reset() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::default());
        sink.append(&[Line::toned(Tone::Failed, "bad")]).unwrap();
        let out = output(sink);
        assert!(out.contains("bad"));
        assert!(out.contains("\u{1b}[0m"));
    }

    #[test]
    fn test_failed_redraw_erases_partial_rows_next_time() {
        let writer = FlakyWriter {
            written: Vec::new(),
            newlines_left: 2,
        };
        let mut sink = TerminalSink::new(writer, Theme::monochrome());
        assert!(sink.redraw(&frame(&["done"], &["a", "b"])).is_err());
        assert_eq!(sink.live_height, 2);

        sink.out.newlines_left = 10;
        sink.redraw(&frame(&["done"], &["a", "b"])).unwrap();
        assert_eq!(sink.live_height, 2);
        let out = String::from_utf8(sink.into_inner().written).unwrap();
        assert!(out.contains("\u{1b}[2A"));
        assert!(out.ends_with("done\na\nb\n"));
    }

    #[test]
    fn test_append_clears_abandoned_live_region() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::monochrome());
        sink.redraw(&frame(&[], &["a", "b"])).unwrap();
        sink.append(&[Line::plain("late")]).unwrap();
        assert_eq!(sink.live_height, 0);
        let out = output(sink);
        assert!(out.contains("\u{1b}[2A"));
        assert!(out.ends_with("late\n"));
    }

    #[test]
    fn test_non_tty_is_not_interactive() {
        assert!(matches!(
            acquire_with(&RenderConfig::default(), false),
            Err(FatalError::NotInteractive)
        ));
        let config = RenderConfig {
            width: Some(90),
            ..RenderConfig::default()
        };
        assert_eq!(acquire_with(&config, true).unwrap(), 90);
    }

    #[test]
    fn test_forced_width_skips_detection() {
        let config = RenderConfig {
            force_interactive: true,
            width: Some(72),
            ..RenderConfig::default()
        };
        assert_eq!(acquire(&config).unwrap(), 72);
    }
}
