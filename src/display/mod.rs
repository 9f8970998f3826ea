//! Display composition and terminal output.

pub mod composer;
pub mod detail;
pub mod diff;
pub mod format;
pub mod frame;
pub mod terminal;
pub mod theme;

pub use composer::{Composer, DisplayPolicy, PrintState};
pub use frame::{Frame, Line, Span, Tone};
pub use terminal::{acquire, acquire_with, FrameSink, TerminalSink};
pub use theme::{Style, Theme};
