//! Log backend for the binary.
//!
//! The library only emits `log` records. The binary forwards them to a
//! `tracing` subscriber, but never onto a terminal that hosts the live region.

use std::error::Error;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "live_task_render=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
    Off,
}

/// A configured file always wins. Otherwise stderr is used unless both
/// standard streams are the same interactive terminal.
pub fn choose_target(log_file: Option<&Path>, stdout_tty: bool, stderr_tty: bool) -> LogTarget {
    match log_file {
        Some(path) => LogTarget::File(path.to_path_buf()),
        None if !stdout_tty || !stderr_tty => LogTarget::Stderr,
        None => LogTarget::Off,
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber for `target`. Also captures `log` records.
pub fn init_logging(target: &LogTarget) -> Result<(), Box<dyn Error + Send + Sync>> {
    match target {
        LogTarget::Off => Ok(()),
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(io::stderr)
            .try_init(),
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_target_wins() {
        let path = Path::new("/var/log/render.log");
        assert_eq!(choose_target(Some(path), true, true), LogTarget::File(path.to_path_buf()));
        assert_eq!(choose_target(Some(path), false, false), LogTarget::File(path.to_path_buf()));
    }

    #[test]
    fn test_stderr_only_off_the_live_terminal() {
        assert_eq!(choose_target(None, true, true), LogTarget::Off);
        assert_eq!(choose_target(None, false, true), LogTarget::Stderr);
        assert_eq!(choose_target(None, true, false), LogTarget::Stderr);
    }

    #[test]
    fn test_off_installs_nothing() {
        assert!(init_logging(&LogTarget::Off).is_ok());
    }
}
