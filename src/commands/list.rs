use anyhow::Result;
use chrono::Utc;

use crate::config::AppConfig;
use crate::filter::{Filter, FilterSet, COMMAND, DIRECTORY, LIVE};
use crate::view::{style_exit_cell, table_border, table_header, Row};

use super::common::load_tracker;

const COLUMNS: usize = 6;
const EXIT_COLUMN: usize = 3;

pub(crate) fn run(
    config: &AppConfig,
    command: Option<String>,
    dir: Option<String>,
    live: bool,
    json: bool,
) -> Result<()> {
    let filters = build_filters(command.as_deref(), dir.as_deref(), live)?;
    let tracker = load_tracker(config)?;
    let rows: Vec<Row> = tracker
        .snapshot(&filters, Utc::now(), config.recent_window)
        .into_iter()
        .map(|(_, row)| row)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if !filters.is_empty() {
        let active: Vec<String> = filters
            .labels()
            .into_iter()
            .map(|(category, label)| format!("{category}: {label}"))
            .collect();
        println!("Filters: {}", active.join(", "));
    }
    print_item_table(rows);
    Ok(())
}

fn build_filters(command: Option<&str>, dir: Option<&str>, live: bool) -> Result<FilterSet> {
    let mut filters = FilterSet::default();
    if let Some(pattern) = command {
        filters.set(COMMAND, Filter::command(pattern)?);
    }
    if let Some(prefix) = dir {
        filters.set(DIRECTORY, Filter::directory(prefix));
    }
    if live {
        filters.toggle(LIVE, Filter::live());
    }
    Ok(filters)
}

fn print_item_table(rows: Vec<Row>) {
    if rows.is_empty() {
        println!("No tracked commands.");
        return;
    }

    let headers = ["ID", "STARTED", "DURATION", "EXIT", "DIRECTORY", "COMMAND"];
    let cells: Vec<[String; COLUMNS]> = rows
        .into_iter()
        .map(|row| {
            [
                row.id,
                row.started,
                row.duration,
                row.exit,
                row.directory,
                row.command,
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &cells {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    print_border(&widths);
    print_header(&headers, &widths);
    print_border(&widths);
    for row in &cells {
        print_row(row, &widths);
    }
    print_border(&widths);
}

fn print_border(widths: &[usize; COLUMNS]) {
    let mut line = String::from("+");
    for width in widths {
        line.push_str(&format!("-{}-+", "-".repeat(*width)));
    }
    println!("{}", table_border(&line));
}

fn print_header(cells: &[&str; COLUMNS], widths: &[usize; COLUMNS]) {
    print!("|");
    for (idx, cell) in cells.iter().enumerate() {
        let padded = format!("{:<width$}", cell, width = widths[idx]);
        print!(" {} |", table_header(&padded));
    }
    println!();
}

fn print_row(cells: &[String; COLUMNS], widths: &[usize; COLUMNS]) {
    print!("|");
    for (idx, cell) in cells.iter().enumerate() {
        let padded = format!("{:<width$}", cell, width = widths[idx]);
        if idx == EXIT_COLUMN {
            print!(" {} |", style_exit_cell(&padded, cell));
        } else {
            print!(" {padded} |");
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::build_filters;
    use crate::item::{Item, ItemId};

    #[test]
    fn cli_flags_become_and_combined_filters() {
        let filters = build_filters(Some("^cargo"), Some("/src"), false).expect("valid filters");
        let build = Item::new(ItemId(1), "cargo build", None, "/src/app", Utc::now());
        let elsewhere = Item::new(ItemId(2), "cargo test", None, "/tmp", Utc::now());
        let other = Item::new(ItemId(3), "make", None, "/src/app", Utc::now());

        assert!(filters.matches(&build));
        assert!(!filters.matches(&elsewhere));
        assert!(!filters.matches(&other));
        assert_eq!(filters.labels().len(), 2);
    }

    #[test]
    fn live_flag_toggles_live_filter_on() {
        let filters = build_filters(None, None, true).expect("valid filters");
        let running = Item::new(ItemId(1), "sleep 5", None, "/", Utc::now());
        let mut done = Item::new(ItemId(2), "true", None, "/", Utc::now());
        done.finalize(Utc::now(), Some(0));

        assert!(filters.matches(&running));
        assert!(!filters.matches(&done));
        assert_eq!(filters.labels(), vec![("live", "live")]);
    }

    #[test]
    fn invalid_command_pattern_is_rejected() {
        assert!(build_filters(Some("("), None, false).is_err());
    }
}
