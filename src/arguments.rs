//! Command-line argument scanning
//!
//! The bot takes no positional arguments; everything is flags. Debug output
//! is gated per module with `--debug-<module>` so a noisy subsystem can be
//! inspected without drowning the console.

use once_cell::sync::Lazy;
use std::env;

pub static CMD_ARGS: Lazy<Vec<String>> = Lazy::new(|| env::args().collect());

fn has_flag(flag: &str) -> bool {
    CMD_ARGS.iter().any(|a| a == flag)
}

pub fn is_help_requested() -> bool {
    has_flag("--help") || has_flag("-h")
}

/// `--reset` wipes persisted state and the trade journal after confirmation
pub fn is_reset_enabled() -> bool {
    has_flag("--reset")
}

/// `--paper` forces the paper trading endpoint regardless of config
pub fn is_paper_forced() -> bool {
    has_flag("--paper")
}

/// `--config <path>` overrides the default config file location
pub fn config_path_override() -> Option<String> {
    let args = &*CMD_ARGS;
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned()
}

pub fn is_verbose_enabled() -> bool {
    has_flag("--verbose")
}

pub fn is_quiet_enabled() -> bool {
    has_flag("--quiet")
}

/// Check for a `--debug-<module>` flag by module key
pub fn is_debug_enabled(module: &str) -> bool {
    let flag = format!("--debug-{}", module);
    CMD_ARGS.iter().any(|a| *a == flag) || has_flag("--debug-all")
}

pub fn is_debug_feed_enabled() -> bool {
    is_debug_enabled("feed")
}

pub fn is_debug_signal_enabled() -> bool {
    is_debug_enabled("signal")
}

pub fn is_debug_execution_enabled() -> bool {
    is_debug_enabled("execution")
}

pub fn is_debug_state_enabled() -> bool {
    is_debug_enabled("state")
}

pub fn print_help() {
    println!("rotorbot - intraday bull/bear rotation agent");
    println!();
    println!("USAGE:");
    println!("    rotorbot [FLAGS]");
    println!();
    println!("FLAGS:");
    println!("    --config <path>      Use an alternate config file (default: data/config.toml)");
    println!("    --paper              Force the paper trading endpoint");
    println!("    --reset              Delete persisted state and trade journal, then exit");
    println!("    --verbose            Show verbose trace output");
    println!("    --quiet              Suppress everything below warnings");
    println!("    --debug-<module>     Enable debug logs for a module");
    println!("                         (feed, signal, stops, execution, state, broker, journal)");
    println!("    --debug-all          Enable debug logs for every module");
    println!("    -h, --help           Print this help");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_matching_is_exact() {
        // args come from the test harness; just exercise the format logic
        assert!(!is_debug_enabled("feed") || CMD_ARGS.iter().any(|a| a.starts_with("--debug")));
    }
}
