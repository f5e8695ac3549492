//! Output formatting utilities for CLI commands
//!
//! Provides consistent formatting for:
//! - Tables with column alignment
//! - Timestamps (relative and absolute)
//! - Colors for workflow status

use bastion_db::{Attributes, WorkflowStatus};
use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Format a timestamp relative to `now`
///
/// Examples:
/// - "2 seconds ago"
/// - "5 minutes ago"
/// - "in 40 minutes" (future deadlines)
/// - "2024-12-15 14:30" (if more than a week away)
pub fn format_relative(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(time).num_seconds();
    if secs >= 0 {
        match describe_span(secs as u64) {
            Some(span) => format!("{} ago", span),
            None => format_absolute(time),
        }
    } else {
        match describe_span(secs.unsigned_abs()) {
            Some(span) => format!("in {}", span),
            None => format_absolute(time),
        }
    }
}

/// Human span under a week, `None` beyond that.
fn describe_span(secs: u64) -> Option<String> {
    let (n, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs / 60, "minute")
    } else if secs < 86400 {
        (secs / 3600, "hour")
    } else if secs < 604800 {
        (secs / 86400, "day")
    } else {
        return None;
    };
    Some(format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" }))
}

/// Local wall-clock rendering
pub fn format_absolute(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_attributes(attrs: &Attributes) -> String {
    if attrs.is_empty() {
        return "-".to_string();
    }
    attrs
        .iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn status_color(status: WorkflowStatus) -> Color {
    match status {
        WorkflowStatus::Pending => Color::Yellow,
        WorkflowStatus::Approved => Color::Cyan,
        WorkflowStatus::Success => Color::Green,
        WorkflowStatus::Denied | WorkflowStatus::Failed | WorkflowStatus::TimedOut => Color::Red,
        WorkflowStatus::Expired => Color::Grey,
    }
}

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(|text| (text, None)).collect())
        .collect();
    print_table_colored(headers, rows);
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Print any serializable value as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
