use std::{
    io::{self, BufRead},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crossbeam_channel::{select, tick, unbounded, Receiver};
use log::{error, info, warn};

use crate::app::logging::{choose_target, init_logging};
use crate::app::session::LiveSession;
use crate::config::RenderConfig;
use crate::display::terminal::{stderr_is_tty, stdout_is_tty};
use crate::models::LifecycleEvent;

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

const INTERRUPT_POLL: Duration = Duration::from_millis(50);

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_interrupt_handler() {
    let handler = on_interrupt as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

/// Parses one JSON line. Blank lines yield `Ok(None)`.
pub fn parse_event_line(line: &str) -> Result<Option<LifecycleEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Reads lifecycle events from stdin until it closes or SIGINT arrives.
/// Returns the process exit code.
pub fn run_cli() -> i32 {
    let config = match RenderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("live-task-render: {}", e);
            return EXIT_CONFIG;
        }
    };
    let target = choose_target(config.log_file.as_deref(), stdout_is_tty(), stderr_is_tty());
    if let Err(e) = init_logging(&target) {
        eprintln!("live-task-render: logging disabled: {}", e);
    }
    let session = match LiveSession::start(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("live-task-render: {}", e);
            return EXIT_CONFIG;
        }
    };
    install_interrupt_handler();

    let events = session.events();
    let lines = spawn_stdin_reader();
    let poll = tick(INTERRUPT_POLL);
    let mut line_no = 0u64;

    let code = loop {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => {
                    line_no += 1;
                    match parse_event_line(&line) {
                        Ok(Some(event)) => events.send(event),
                        Ok(None) => {}
                        Err(e) => warn!("Skipping malformed event on line {}: {}", line_no, e),
                    }
                }
                Err(_) => break EXIT_OK,
            },
            recv(poll) -> _ => {
                if INTERRUPTED.load(Ordering::SeqCst) {
                    info!("Interrupted.");
                    events.abort();
                    break EXIT_INTERRUPTED;
                }
            }
        }
    };

    let report = session.finish();
    if report.ingest.data_errors > 0 {
        info!("{} events referenced unknown or finished tasks.", report.ingest.data_errors);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FinalStatus, HostOutcome};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parses_task_events() {
        let event = parse_event_line(r#"{"event": "task_end", "task_id": "t1", "status": "failed"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            LifecycleEvent::TaskEnd {
                task_id: "t1".into(),
                status: FinalStatus::Failed,
            }
        );
    }

    #[test]
    fn test_payload_defaults_to_null() {
        let event = parse_event_line(r#"{"event":"task_host_result","task_id":"t1","host":"web1","outcome":"changed"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            LifecycleEvent::TaskHostResult {
                task_id: "t1".into(),
                host: "web1".to_string(),
                payload: json!(null),
                outcome: HostOutcome::Changed,
                no_log: false,
            }
        );
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert!(parse_event_line("   ").unwrap().is_none());
        assert!(parse_event_line("{not json").is_err());
        assert!(parse_event_line(r#"{"event": "task_teleport"}"#).is_err());
    }
}
