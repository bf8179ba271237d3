//! Operator-facing status lines (startup, shutdown, fatal errors).

use std::fmt;

use chrono::{DateTime, Local};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Ok,
    Warn,
    Fail,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Ok => "ok",
            Level::Warn => "warn",
            Level::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Emit a status line at the tracing level matching `level`.
pub fn status(message: &str, level: Level) {
    let line = format_line(message, level, Local::now());
    match level {
        Level::Ok => tracing::info!("{line}"),
        Level::Warn => tracing::warn!("{line}"),
        Level::Fail => tracing::error!("{line}"),
    }
}

fn format_line(message: &str, level: Level, now: DateTime<Local>) -> String {
    format!("[{}] [{level}] {message}", now.format("%H:%M:%S"))
}
