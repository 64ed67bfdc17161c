//! Log formatting and output
//!
//! Colorized console line plus a plain line appended to the log file.

use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

const TAG_WIDTH: usize = 8;

pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();

    let tag_str = format_tag(&tag);
    let level_str = format_level(level);

    let console_line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        tag_str,
        level_str,
        message
    );
    print_stdout_safe(&console_line);

    let file_line = format!(
        "{} [{}] [{}] {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        tag.to_plain_string(),
        level.as_str(),
        message
    );
    write_to_file(&file_line);
}

fn format_tag(tag: &LogTag) -> String {
    let padded = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => padded.bright_white().to_string(),
        LogTag::Config => padded.cyan().to_string(),
        LogTag::State => padded.blue().to_string(),
        LogTag::Feed => padded.bright_green().to_string(),
        LogTag::Signal => padded.magenta().to_string(),
        LogTag::Stops => padded.bright_red().to_string(),
        LogTag::Execution => padded.yellow().to_string(),
        LogTag::Broker => padded.green().to_string(),
        LogTag::Journal => padded.bright_black().to_string(),
        LogTag::Shutdown => padded.red().to_string(),
    }
}

fn format_level(level: LogLevel) -> String {
    let s = format!("{:<7}", level.as_str());
    match level {
        LogLevel::Error => s.red().bold().to_string(),
        LogLevel::Warning => s.yellow().to_string(),
        LogLevel::Info => s.normal().to_string(),
        LogLevel::Debug => s.purple().to_string(),
        LogLevel::Verbose => s.dimmed().to_string(),
    }
}

/// Print without panicking when stdout is a closed pipe
fn print_stdout_safe(line: &str) {
    let mut out = stdout();
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
    let _ = out.flush();
}
