use anyhow::{anyhow, Context};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// CSV fields carry no type. Text becomes a number only when it prints back
    /// unchanged, so ids like `007` keep their leading zeros.
    pub fn from_field(raw: &str) -> Cell {
        let t = raw.trim();
        if t.is_empty() {
            return Cell::Empty;
        }
        match t.parse::<f64>() {
            Ok(v) if v.is_finite() && format_number(v) == t => Cell::Number(v),
            _ => Cell::Text(t.to_string()),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Cell {
        match v {
            serde_json::Value::Null => Cell::Empty,
            serde_json::Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            serde_json::Value::String(s) if s.trim().is_empty() => Cell::Empty,
            serde_json::Value::String(s) => Cell::Text(s.trim().to_string()),
            serde_json::Value::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Display text: whole numbers drop the fractional part (`1001`, not `1001.0`).
    pub fn text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(v) => format_number(*v),
            Cell::Text(s) => s.clone(),
        }
    }
}

pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.0}", v)
    } else {
        v.to_string()
    }
}

impl Serialize for Cell {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Empty => s.serialize_none(),
            Cell::Number(v) => s.serialize_f64(*v),
            Cell::Text(t) => s.serialize_str(t),
        }
    }
}

/// Row-major grid of cells as read from one sheet or CSV file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Vec<Cell>>,
    /// 1-based position in the source for each kept row; blank rows are gone from `rows`.
    source_rows: Vec<usize>,
}

impl Table {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        let (source_rows, rows) = rows
            .into_iter()
            .enumerate()
            .filter(|(_, r)| r.iter().any(|c| !c.is_empty()))
            .map(|(i, r)| (i + 1, r))
            .unzip();
        Self { rows, source_rows }
    }

    /// Source row number of `rows[index]`, counting the blank rows that were skipped.
    pub fn source_row(&self, index: usize) -> usize {
        self.source_rows.get(index).copied().unwrap_or(index + 1)
    }

    pub fn from_json(raw: &serde_json::Value) -> anyhow::Result<Table> {
        let rows = raw
            .as_array()
            .ok_or_else(|| anyhow!("table must be an array of rows"))?;
        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let cells = row
                .as_array()
                .ok_or_else(|| anyhow!("table row {} must be an array", i + 1))?;
            out.push(cells.iter().map(Cell::from_json).collect());
        }
        Ok(Table::new(out))
    }
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    out.push(buf);
    out
}

fn record_cells(record: &str) -> Vec<Cell> {
    parse_csv_record(record)
        .iter()
        .map(|f| Cell::from_field(f))
        .collect()
}

/// A quoted field may span lines; such a record is one row of the table.
pub fn parse_csv(text: &str) -> Table {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut open: Option<String> = None;
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let record = match open.take() {
            Some(mut partial) => {
                partial.push('\n');
                partial.push_str(line);
                partial
            }
            None => line.to_string(),
        };
        // Escaped quotes come in pairs, so an odd count means a field is still open.
        if record.matches('"').count() % 2 == 1 {
            open = Some(record);
            continue;
        }
        rows.push(record_cells(&record));
    }
    if let Some(partial) = open {
        rows.push(record_cells(&partial));
    }
    Table::new(rows)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn read_csv_file(path: &Path) -> anyhow::Result<Table> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok(parse_csv(&text))
}

/// First sheet of a workbook, or the whole file for CSV.
pub fn read_first_table(path: &Path) -> anyhow::Result<Table> {
    match extension(path).as_str() {
        "csv" => read_csv_file(path),
        "xlsx" | "xlsm" => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
            let mut workbook = crate::xlsx::Workbook::open(bytes)?;
            let first = workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("workbook has no sheets"))?;
            workbook.read_sheet(&first)
        }
        other => Err(anyhow!("unsupported file type: .{}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_record_handles_quotes_and_commas() {
        let f = parse_csv_record(r#"Midterm,1001,"Li, Wei",G1,"A ""east""",95"#);
        assert_eq!(f, vec!["Midterm", "1001", "Li, Wei", "G1", "A \"east\"", "95"]);
    }

    #[test]
    fn csv_skips_blank_rows_and_types_numbers() {
        let t = parse_csv("\u{feff}a,b\r\n\r\n,\n1001,92.5\n");
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1][0], Cell::Number(1001.0));
        assert_eq!(t.rows[1][0].text(), "1001");
        assert_eq!(t.rows[1][1].text(), "92.5");
        assert_eq!(Cell::from_field("007"), Cell::Text("007".to_string()));
    }

    #[test]
    fn quoted_field_keeps_embedded_newline() {
        let t = parse_csv("Exam,ID,Name,Grade,Class\r\nFinal,1001,\"Li\r\nWei\",G1,A\r\nFinal,1002,Wang,G1,B\r\n");
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.rows[1][2].text(), "Li\nWei");
        assert_eq!(t.rows[1][4].text(), "A");
        assert_eq!(t.rows[2][2].text(), "Wang");
        assert_eq!(t.source_row(2), 3);
    }

    #[test]
    fn source_rows_count_skipped_blank_lines() {
        let t = parse_csv("a,b\n\n,\nx,y\n");
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.source_row(0), 1);
        assert_eq!(t.source_row(1), 4);
    }

    #[test]
    fn json_table_maps_nulls_to_empty() {
        let raw = serde_json::json!([["Exam", "ID"], ["Final", 1001], [null, ""]]);
        let t = Table::from_json(&raw).expect("table");
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1][1].text(), "1001");
        assert!(Table::from_json(&serde_json::json!({"a": 1})).is_err());
    }
}
