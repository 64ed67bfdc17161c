//! Configuration loading and access helpers

use super::schemas::Config;
use crate::paths;
use once_cell::sync::OnceCell;
use std::sync::RwLock;

/// Global configuration instance, single source of truth after startup
pub static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// Load configuration from the default path (or `--config` override)
pub fn load_config() -> Result<(), String> {
    let path = crate::arguments::config_path_override()
        .unwrap_or_else(|| paths::config_file_path().to_string_lossy().into_owned());
    load_config_from_path(&path)
}

/// Load configuration from a specific TOML file and initialize the global
///
/// A missing file falls back to defaults; a malformed file is an error, not
/// a silent fallback.
pub fn load_config_from_path(path: &str) -> Result<(), String> {
    let config = if std::path::Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file '{}': {}", path, e))?;
        toml::from_str::<Config>(&contents)
            .map_err(|e| format!("failed to parse config file '{}': {}", path, e))?
    } else {
        Config::default()
    };

    config.validate()?;

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| "config already initialized".to_string())?;

    Ok(())
}

/// Thread-safe read access to the configuration
///
/// Panics if called before `load_config`; startup ordering guarantees this
/// cannot happen in the binary. Tests that touch config-reading code paths
/// must seed it first via `load_config_for_tests`.
pub fn with_config<T>(f: impl FnOnce(&Config) -> T) -> T {
    let lock = CONFIG.get().expect("config accessed before load_config()");
    let guard = lock.read().expect("config lock poisoned");
    f(&guard)
}

/// Seed the global config with defaults when not already initialized.
/// Intended for test setup only.
pub fn load_config_for_tests() {
    let _ = CONFIG.set(RwLock::new(Config::default()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_config_reads_seeded_defaults() {
        load_config_for_tests();
        let window = with_config(|c| c.indicator.window);
        assert!(window >= 1);
    }
}
