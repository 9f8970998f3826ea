//! Render configuration.
//!
//! Built once at startup and passed by value into the pipeline, composer and
//! render loop. Nothing reads it through global state.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_REFRESH: Duration = Duration::from_millis(125);
pub const DEFAULT_SLOTS: usize = 6;
pub const DEFAULT_WIDTH: u16 = 100;
pub const DEFAULT_HISTORY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub refresh_interval: Duration,
    /// When false the live region repaints only after ingested events.
    pub enable_timer: bool,
    pub force_interactive: bool,
    /// Number of running tasks visible in the live region.
    pub slots: usize,
    /// Terminal width in columns. `None` detects it at startup.
    pub width: Option<u16>,
    pub history_limit: usize,
    /// Transform stage names, applied in this order after sanitization.
    pub transformers: Vec<String>,
    pub secrets: Vec<String>,
    pub verbosity: u8,
    pub display_ok_hosts: bool,
    pub display_skipped_hosts: bool,
    pub color: bool,
    /// Where the binary writes its own log records.
    pub log_file: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH,
            enable_timer: true,
            force_interactive: false,
            slots: DEFAULT_SLOTS,
            width: None,
            history_limit: DEFAULT_HISTORY,
            transformers: vec![],
            secrets: vec![],
            verbosity: 0,
            display_ok_hosts: true,
            display_skipped_hosts: false,
            color: true,
            log_file: None,
        }
    }
}

impl RenderConfig {
    /// Defaults overlaid with `RLO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "RLO_REFRESH_MS")? {
            config.refresh_interval = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_flag(&lookup, "RLO_ENABLE_TIMER")? {
            config.enable_timer = flag;
        }
        if let Some(flag) = parse_flag(&lookup, "RLO_FORCE_INTERACTIVE")? {
            config.force_interactive = flag;
        }
        if let Some(slots) = parse_var(&lookup, "RLO_SLOTS")? {
            config.slots = slots;
        }
        if let Some(width) = parse_var(&lookup, "RLO_WIDTH")? {
            config.width = Some(width);
        }
        if let Some(history) = parse_var(&lookup, "RLO_HISTORY")? {
            config.history_limit = history;
        }
        if let Some(list) = lookup("RLO_TRANSFORMER") {
            config.transformers = split_list(&list);
        }
        if let Some(list) = lookup("RLO_SECRETS") {
            config.secrets = split_list(&list);
        }
        if let Some(verbosity) = parse_var(&lookup, "RLO_VERBOSITY")? {
            config.verbosity = verbosity;
        }
        if let Some(flag) = parse_flag(&lookup, "RLO_DISPLAY_OK_HOSTS")? {
            config.display_ok_hosts = flag;
        }
        if let Some(flag) = parse_flag(&lookup, "RLO_DISPLAY_SKIPPED_HOSTS")? {
            config.display_skipped_hosts = flag;
        }
        if let Some(flag) = parse_flag(&lookup, "RLO_COLOR")? {
            config.color = flag;
        }
        if let Some(path) = lookup("RLO_LOG_FILE").filter(|path| !path.trim().is_empty()) {
            config.log_file = Some(PathBuf::from(path.trim()));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Validation("refresh interval must be positive".to_string()));
        }
        if self.slots == 0 {
            return Err(ConfigError::Validation("at least one running-task slot is required".to_string()));
        }
        if matches!(self.width, Some(width) if width < 20) {
            return Err(ConfigError::Validation("terminal width must be at least 20 columns".to_string()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Validation("history limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

// Accepts the same 0/1 style the callback plugin used, plus true/false.
fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
