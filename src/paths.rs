//! Data-directory layout
//!
//! All runtime artifacts live under `data/` next to the binary:
//! persisted trading state, the trade journal database and log files.

use std::path::PathBuf;

/// Base directory for all runtime data
pub fn data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Directory for log files
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Persisted trading state (atomic JSON snapshot)
pub fn state_file_path() -> PathBuf {
    data_dir().join("trading_state.json")
}

/// Temp file used for atomic state writes (write + rename)
pub fn state_tmp_path() -> PathBuf {
    data_dir().join("trading_state.json.tmp")
}

/// Trade journal SQLite database
pub fn trade_journal_db_path() -> PathBuf {
    data_dir().join("trade_journal.db")
}

/// Default configuration file
pub fn config_file_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Log file for the current process
pub fn log_file_path() -> PathBuf {
    logs_dir().join(format!(
        "rotorbot_{}.log",
        chrono::Local::now().format("%Y%m%d")
    ))
}

/// Create all required directories
///
/// Must run before logger initialization so the log file can be created.
pub fn ensure_all_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir())?;
    std::fs::create_dir_all(logs_dir())?;
    Ok(())
}
