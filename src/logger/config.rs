//! Logger configuration derived from command-line flags

use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments;
use once_cell::sync::Lazy;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level that is displayed (Error always passes)
    pub min_level: LogLevel,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Populate the logger config from command-line flags
pub fn init_from_args() {
    let min_level = if arguments::is_verbose_enabled() {
        LogLevel::Verbose
    } else if arguments::is_quiet_enabled() {
        LogLevel::Warning
    } else {
        LogLevel::Info
    };

    if let Ok(mut cfg) = LOGGER_CONFIG.write() {
        cfg.min_level = min_level;
    }
}

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG
        .read()
        .map(|c| c.clone())
        .unwrap_or_default()
}

/// Debug output for a tag requires its `--debug-<key>` flag
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    arguments::is_debug_enabled(tag.to_debug_key())
}
