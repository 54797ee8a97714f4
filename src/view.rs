//! Rendered rows for the item list plus the terminal styling used to print
//! them. Everything here is a pure function of `(item, now)`.

use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;

use crate::item::Item;

pub const LIVE_EXIT_LABEL: &str = "--";
pub const UNKNOWN_EXIT_LABEL: &str = "??";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub id: String,
    pub started: String,
    pub duration: String,
    pub exit: String,
    pub directory: String,
    pub command: String,
}

pub fn project(item: &Item, now: DateTime<Utc>, recent_window: Duration) -> Row {
    Row {
        id: item.id.to_string(),
        started: relative_start(item.start_time, now, recent_window),
        duration: duration_label(item, now),
        exit: exit_label(item),
        directory: item.directory.clone(),
        command: item.name.clone(),
    }
}

/// `"<duration> ago"` inside the recent window, an absolute local timestamp
/// outside it.
pub fn relative_start(start: DateTime<Utc>, now: DateTime<Utc>, recent_window: Duration) -> String {
    let age = now.signed_duration_since(start);
    if age < recent_window {
        format!("{} ago", format_duration(age))
    } else {
        start
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}

/// Elapsed time for live items, total runtime for finished ones.
pub fn duration_label(item: &Item, now: DateTime<Utc>) -> String {
    let end = item.end_time().unwrap_or(now);
    format_duration(end.signed_duration_since(item.start_time))
}

pub fn exit_label(item: &Item) -> String {
    if item.is_live() {
        return LIVE_EXIT_LABEL.to_string();
    }
    item.exit_status()
        .map_or_else(|| UNKNOWN_EXIT_LABEL.to_string(), |code| code.to_string())
}

/// Two tiers, largest unit first: `1d 1h`, `2h 0m`, `3m 4.5s`, `30.0s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    let total_secs = millis / 1_000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let mins = (total_secs % 3_600) / 60;
    let secs = (millis % 60_000) as f64 / 1_000.0;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m {secs:.1}s")
    } else {
        format!("{secs:.1}s")
    }
}

fn colors_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        if std::env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if std::env::var("TERM")
            .map(|term| term.eq_ignore_ascii_case("dumb"))
            .unwrap_or(false)
        {
            return false;
        }
        io::stdout().is_terminal()
    })
}

fn paint(value: &str, code: &str) -> String {
    if colors_enabled() {
        format!("\x1b[{code}m{value}\x1b[0m")
    } else {
        value.to_string()
    }
}

pub fn table_header(value: &str) -> String {
    paint(value, "1;36")
}

pub fn table_border(value: &str) -> String {
    paint(value, "2;34")
}

/// Colours a pre-padded exit cell by its raw label.
pub fn style_exit_cell(padded: &str, raw_exit: &str) -> String {
    match raw_exit {
        LIVE_EXIT_LABEL => paint(padded, "1;33"),
        UNKNOWN_EXIT_LABEL => paint(padded, "2;37"),
        "0" => paint(padded, "1;32"),
        _ => paint(padded, "1;31"),
    }
}
