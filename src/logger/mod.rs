//! Structured logging for rotorbot
//!
//! Tag + level logging with colored console output and file persistence.
//! Debug output is opt-in per module via `--debug-<module>` flags; verbose
//! output requires `--verbose`.
//!
//! Call `logger::init()` once at startup (after directories exist), then:
//!
//! ```ignore
//! logger::info(LogTag::Execution, "position opened");
//! logger::debug(LogTag::Feed, "tick QQQ @ 512.34"); // only with --debug-feed
//! ```

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Parses command-line flags into the logger config and opens the log file.
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

/// ERROR level - critical issues, always shown
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// WARNING level - needs attention but not critical
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// INFO level - normal operation
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// DEBUG level - gated by `--debug-<module>` for the tag
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// VERBOSE level - gated by `--verbose`
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Flush pending log writes; call during shutdown
pub fn flush() {
    file::flush_file_logging();
}
