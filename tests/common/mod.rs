#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use live_task_render::display::{Frame, FrameSink, Line};
use parking_lot::Mutex;

/// What a [`MemorySink`] received, as plain text.
#[derive(Default, Debug)]
pub struct Captured {
    pub scrollback: Vec<String>,
    pub live: Vec<Vec<String>>,
    pub appended: Vec<String>,
    pub released: bool,
    /// Redraw calls, including refused ones.
    pub attempts: u32,
}

impl Captured {
    /// Every permanent line, redrawn or appended, in write order.
    pub fn permanent(&self) -> Vec<String> {
        self.scrollback.iter().chain(self.appended.iter()).cloned().collect()
    }
}

pub struct MemorySink {
    captured: Arc<Mutex<Captured>>,
    failing_redraws: u32,
}

impl MemorySink {
    pub fn new() -> (Self, Arc<Mutex<Captured>>) {
        Self::failing(0)
    }

    /// Fails the first `redraws` redraw calls.
    pub fn failing(redraws: u32) -> (Self, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = MemorySink {
            captured: captured.clone(),
            failing_redraws: redraws,
        };
        (sink, captured)
    }
}

impl FrameSink for MemorySink {
    fn redraw(&mut self, frame: &Frame) -> io::Result<()> {
        self.captured.lock().attempts += 1;
        if self.failing_redraws > 0 {
            self.failing_redraws -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "redraw refused"));
        }
        let mut captured = self.captured.lock();
        captured.scrollback.extend(frame.scrollback.iter().map(Line::text));
        captured.live.push(frame.live.iter().map(Line::text).collect());
        Ok(())
    }

    fn append(&mut self, lines: &[Line]) -> io::Result<()> {
        self.captured.lock().appended.extend(lines.iter().map(Line::text));
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        self.captured.lock().released = true;
        Ok(())
    }
}

/// Polls `check` until it holds, panicking after a few seconds.
pub fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(2));
    }
}
