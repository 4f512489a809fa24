//! Output formatting for the command-line client.
//!
//! Renders statement outcomes and telemetry records as JSON, ASCII tables
//! (like the MySQL CLI) or Markdown.

use crate::models::{QueryMetrics, QueryResult, StatementOutcome};
use clap::ValueEnum;
use humansize::{BINARY, format_size};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Output format for query/explain results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// ASCII table format (like MySQL CLI)
    Table,
    /// Markdown table format
    Markdown,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

pub fn format_as_table(result: &QueryResult, execution_time: Option<f64>) -> String {
    if result.columns.is_empty() {
        return "Empty set\n".to_string();
    }

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.width()).collect();
    for row in &result.rows {
        for (i, col) in result.columns.iter().enumerate() {
            if let Some(value) = row.get(col) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad(col, *w, Align::Center)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in &result.rows {
        let row_str: String = result
            .columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(col).cloned().unwrap_or(JsonValue::Null);
                let align = if matches!(value, JsonValue::Number(_)) {
                    Align::Right
                } else {
                    Align::Left
                };
                format!("| {} ", pad(&format_value(&value), *w, align))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_count = result.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    match execution_time {
        Some(secs) => output.push_str(&format!(
            "{} {} in set ({:.2} sec)\n",
            row_count, row_text, secs
        )),
        None => output.push_str(&format!("{} {} in set\n", row_count, row_text)),
    }

    output
}

pub fn format_as_markdown(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return "*Empty set*\n".to_string();
    }

    let mut output = String::new();

    let header: String = result
        .columns
        .iter()
        .map(|c| format!("| {} ", c))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = result.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &result.rows {
        let row_str: String = result
            .columns
            .iter()
            .map(|col| {
                let value = row.get(col).cloned().unwrap_or(JsonValue::Null);
                format!("| {} ", format_value(&value).replace('|', "\\|"))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&format!("\n*{} rows*\n", result.row_count()));

    output
}

/// Render a statement outcome in the requested format.
pub fn format_outcome(
    outcome: &StatementOutcome,
    format: OutputFormat,
    execution_time: Option<f64>,
) -> String {
    match (outcome, format) {
        (_, OutputFormat::Json) => to_pretty_json(outcome),
        (StatementOutcome::Rows(result), OutputFormat::Table) => {
            format_as_table(result, execution_time)
        }
        (StatementOutcome::Rows(result), OutputFormat::Markdown) => format_as_markdown(result),
        (StatementOutcome::Completed { rows_affected }, _) => {
            format!("Query OK, {} rows affected\n", rows_affected)
        }
    }
}

/// Render a telemetry record in the requested format.
pub fn format_metrics(metrics: &QueryMetrics, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_pretty_json(metrics);
    }

    let indexes = if metrics.indexes_used.is_empty() {
        "-".to_string()
    } else {
        metrics.indexes_used.join(", ")
    };
    let memory = metrics
        .memory_used
        .map(|bytes| format_size(bytes, BINARY))
        .unwrap_or_else(|| "n/a".to_string());

    let entries = [
        ("Execution time", format!("{:.4} sec", metrics.execution_time)),
        ("Rows", metrics.row_count.to_string()),
        ("Captured at", metrics.timestamp.to_rfc3339()),
        ("Indexes", indexes),
        ("Table scans", metrics.table_scans.to_string()),
        ("Temp tables", metrics.temp_tables.to_string()),
        ("Memory", memory),
    ];

    let label_width = entries.iter().map(|(k, _)| k.width()).max().unwrap_or(0);
    let mut output = String::new();
    for (label, value) in entries {
        let line = match format {
            OutputFormat::Markdown => format!("- **{}**: {}\n", label, value),
            _ => format!("{} : {}\n", pad(label, label_width, Align::Left), value),
        };
        output.push_str(&line);
    }
    output
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default() + "\n"
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
}

/// Pad by display width so CJK and emoji columns stay aligned.
fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = width.saturating_sub(text.width());
    match align {
        Align::Left => format!("{}{}", text, " ".repeat(fill)),
        Align::Right => format!("{}{}", " ".repeat(fill), text),
        Align::Center => {
            let left = fill / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(fill - left))
        }
    }
}
