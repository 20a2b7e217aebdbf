//! # Console Logging
//!
//! Thin layer over the `log` facade. Library code logs with the usual macros;
//! the three extra labels the server needs (`OK`, `ALERT`, `SUM`) are carried
//! as log targets so any `log` backend still sees them.
//!
//! Output format: `[HH:MM:SS] [LABEL] message`

use std::io::{IsTerminal, Write};

use env_logger::Builder;
use log::{Level, LevelFilter};

pub const OK_TARGET: &str = "grid::ok";
pub const ALERT_TARGET: &str = "grid::alert";
pub const SUM_TARGET: &str = "grid::sum";

const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const CYAN: &str = "\x1b[36m";
const BOLD_RED: &str = "\x1b[1;31m";
const BOLD_GREEN: &str = "\x1b[1;32m";

/// Log a success line (`[OK]`).
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        ::log::info!(target: $crate::logging::OK_TARGET, $($arg)+)
    };
}

/// Log an anomaly alert (`[ALERT]`).
#[macro_export]
macro_rules! alert {
    ($($arg:tt)+) => {
        ::log::warn!(target: $crate::logging::ALERT_TARGET, $($arg)+)
    };
}

/// Log a completed power summation (`[SUM]`).
#[macro_export]
macro_rules! sum_result {
    ($($arg:tt)+) => {
        ::log::info!(target: $crate::logging::SUM_TARGET, $($arg)+)
    };
}

/// Map a record to its console label and ANSI colour.
pub fn label_for(target: &str, level: Level) -> (&'static str, &'static str) {
    match target {
        OK_TARGET => ("OK", GREEN),
        ALERT_TARGET => ("ALERT", BOLD_RED),
        SUM_TARGET => ("SUM", BOLD_GREEN),
        _ => match level {
            Level::Error => ("ERROR", RED),
            Level::Warn => ("WARN", YELLOW),
            Level::Info => ("INFO", CYAN),
            Level::Debug => ("DEBUG", BLUE),
            Level::Trace => ("TRACE", BLUE),
        },
    }
}

/// Initialize the process-wide logger.
///
/// Lines go to stdout at INFO by default; `RUST_LOG` overrides the level.
/// Colours are only emitted when stdout is a terminal.
pub fn init_logger() {
    let colored = std::io::stdout().is_terminal();

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder
        .target(env_logger::Target::Stdout)
        .format(move |buf, record| {
            let (label, color) = label_for(record.target(), record.level());
            let timestamp = chrono::Local::now().format("%H:%M:%S");
            if colored {
                writeln!(
                    buf,
                    "{}[{}] [{}]{} {}",
                    color,
                    timestamp,
                    label,
                    RESET,
                    record.args()
                )
            } else {
                writeln!(buf, "[{}] [{}] {}", timestamp, label, record.args())
            }
        })
        .init();
}
