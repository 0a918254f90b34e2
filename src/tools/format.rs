//! Text rendering for query results and schema samples.

use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Sample cells longer than this are cut with an ellipsis.
const SAMPLE_CELL_MAX_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

/// MySQL-CLI style table with a row-count footer.
pub fn format_as_table(
    columns: &[ColumnInfo],
    rows: &[Vec<JsonValue>],
    row_count: usize,
    execution_time_ms: u64,
) -> String {
    if columns.is_empty() {
        return "Empty set".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.name.width()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(format_value(value).width());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = String::new();
    output.push_str(&separator);
    for (col, w) in columns.iter().zip(&widths) {
        output.push_str(&format!("| {} ", pad(&col.name, *w, Align::Center)));
    }
    output.push_str("|\n");
    output.push_str(&separator);

    for row in rows {
        for (i, w) in widths.iter().enumerate() {
            let value = row.get(i).unwrap_or(&JsonValue::Null);
            let align = if value.is_number() {
                Align::Right
            } else {
                Align::Left
            };
            output.push_str(&format!("| {} ", pad(&format_value(value), *w, align)));
        }
        output.push_str("|\n");
    }
    output.push_str(&separator);

    let row_text = if row_count == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        row_count,
        row_text,
        execution_time_ms as f64 / 1000.0
    ));

    output
}

/// Comment block with sample rows, appended after a `CREATE TABLE` rendering.
pub fn format_sample_rows(
    table: &str,
    columns: &[ColumnInfo],
    rows: &[Vec<JsonValue>],
) -> String {
    let mut output = format!("/*\n{} rows from {} table:\n", rows.len(), table);
    let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    output.push_str(&header.join("\t"));
    output.push('\n');

    for row in rows {
        let cells: Vec<String> = (0..columns.len())
            .map(|i| truncate_cell(&format_value(row.get(i).unwrap_or(&JsonValue::Null))))
            .collect();
        output.push_str(&cells.join("\t"));
        output.push('\n');
    }
    output.push_str("*/");
    output
}

enum Align {
    Left,
    Right,
    Center,
}

/// Pad by display width so wide characters line up.
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

fn truncate_cell(text: &str) -> String {
    if text.chars().count() <= SAMPLE_CELL_MAX_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SAMPLE_CELL_MAX_CHARS).collect();
    format!("{}...", cut)
}
