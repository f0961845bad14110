use crate::db::{CellValue, ResultSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Tsv,
    Json,
}

pub fn render(result: &ResultSet, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => to_table(result),
        OutputFormat::Csv => to_csv(result),
        OutputFormat::Tsv => to_tsv(result),
        OutputFormat::Json => to_json(result),
    }
}

/// Column-aligned text table followed by a row count footer.
pub fn to_table(result: &ResultSet) -> String {
    if result.columns.is_empty() {
        return match result.affected_rows {
            Some(n) => format!("({} rows affected)\n", n),
            None => "(no columns)\n".to_string(),
        };
    }

    let mut output = String::new();

    let header: Vec<String> = result
        .columns
        .iter()
        .map(|c| pad(&c.name, c.max_width))
        .collect();
    output.push_str(header.join(" | ").trim_end());
    output.push('\n');

    let rule: Vec<String> = result.columns.iter().map(|c| "-".repeat(c.max_width)).collect();
    output.push_str(&rule.join("-+-"));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&result.columns)
            .map(|(cell, col)| pad(&cell.display(), col.max_width))
            .collect();
        output.push_str(cells.join(" | ").trim_end());
        output.push('\n');
    }

    let count = result.row_count();
    output.push_str(&format!("({} row{})\n", count, if count == 1 { "" } else { "s" }));
    output
}

pub fn to_csv(result: &ResultSet) -> String {
    let mut output = String::new();

    let headers: Vec<String> = result.columns.iter().map(|c| csv_escape(&c.name)).collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| csv_escape(&cell_to_text(cell)))
            .collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

pub fn to_tsv(result: &ResultSet) -> String {
    let mut output = String::new();

    let headers: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    output.push_str(&headers.join("\t"));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| cell_to_text(cell).replace(['\t', '\n'], " "))
            .collect();
        output.push_str(&cells.join("\t"));
        output.push('\n');
    }

    output
}

/// Rows as an array of objects keyed by column name.
pub fn to_json(result: &ResultSet) -> String {
    let rows_json: Vec<serde_json::Value> = result
        .records()
        .map(|record| {
            let obj: serde_json::Map<String, serde_json::Value> = record
                .into_iter()
                .map(|(name, cell)| (name.to_string(), cell_to_json(cell)))
                .collect();
            serde_json::Value::Object(obj)
        })
        .collect();

    serde_json::to_string_pretty(&rows_json).unwrap_or_else(|_| "[]".to_string())
}

fn pad(text: &str, width: usize) -> String {
    let used = unicode_width::UnicodeWidthStr::width(text);
    format!("{}{}", text, " ".repeat(width.saturating_sub(used)))
}

fn cell_to_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        other => other.display(),
    }
}

fn cell_to_json(cell: &CellValue) -> serde_json::Value {
    match cell {
        CellValue::Null => serde_json::Value::Null,
        CellValue::Bool(b) => serde_json::Value::Bool(*b),
        CellValue::Int16(i) => serde_json::json!(*i),
        CellValue::Int32(i) => serde_json::json!(*i),
        CellValue::Int64(i) => serde_json::json!(*i),
        CellValue::Float32(f) => serde_json::json!(*f),
        CellValue::Float64(f) => serde_json::json!(*f),
        CellValue::Json(j) => j.clone(),
        other => serde_json::Value::String(other.display()),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
