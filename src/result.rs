//! Query Result - rows returned for an accepted plan

use crate::generator::SqlOrigin;
use serde::Serialize;
use serde_json::{Map, Value};

/// Raw rows as produced by an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// More rows matched than the row limit allowed
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl RowSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().filter_map(move |row| row.get(column))
    }
}

/// Result of executing an accepted plan.
///
/// Only the planner builds these, so every `QueryResult` carries SQL that
/// passed the sanitizer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    request_id: String,
    table: String,
    sql_text: String,
    origin: SqlOrigin,
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
    row_count: usize,
    truncated: bool,
    execution_time_ms: u64,
    engine_name: String,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl QueryResult {
    pub(crate) fn new(
        request_id: &str,
        table: &str,
        sql_text: &str,
        origin: SqlOrigin,
        rows: RowSet,
        engine_name: &str,
        warnings: Vec<String>,
    ) -> Self {
        let row_count = rows.row_count();
        Self {
            request_id: request_id.to_string(),
            table: table.to_string(),
            sql_text: sql_text.to_string(),
            origin,
            columns: rows.columns,
            rows: rows.rows,
            row_count,
            truncated: rows.truncated,
            execution_time_ms: rows.execution_time_ms,
            engine_name: engine_name.to_string(),
            warnings,
            note: None,
        }
    }

    pub(crate) fn push_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub(crate) fn set_note(&mut self, note: String) {
        self.note = Some(note);
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sql_text(&self) -> &str {
        &self.sql_text
    }

    pub fn origin(&self) -> SqlOrigin {
        self.origin
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

const REVIEWED_ROWS: usize = 10;

/// Sanity checks on returned rows. Never blocks, only warns.
pub fn review_rows(rows: &RowSet, money_columns: &[&str], row_limit: usize) -> Vec<String> {
    let mut warnings = Vec::new();

    for column in rows.columns.iter().filter(|c| money_columns.contains(&c.as_str()) || is_total_alias(c)) {
        let negative = rows
            .rows
            .iter()
            .take(REVIEWED_ROWS)
            .filter_map(|row| row.get(column.as_str()))
            .filter_map(numeric_value)
            .any(|v| v < 0.0);
        if negative {
            warnings.push(format!("column {} contains negative amounts", column));
        }
    }

    if rows.truncated {
        warnings.push(format!(
            "result truncated to {} rows; add a filter or LIMIT for a complete answer",
            row_limit
        ));
    }

    warnings
}

fn is_total_alias(column: &str) -> bool {
    let lowered = column.to_lowercase();
    lowered == "total" || lowered.starts_with("total_") || lowered.starts_with("sum(")
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(['$', ','], "").trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Explanation attached to a result with no rows
pub fn empty_result_note(sql: &str, year_column: Option<&str>, available_years: &[String]) -> String {
    let lowered = sql.to_lowercase();

    if let Some(year_column) = year_column {
        if lowered.contains(&year_column.to_lowercase()) {
            return if available_years.is_empty() {
                "No data found. Unable to determine which years are available.".to_string()
            } else {
                format!(
                    "No data found for the requested year. Available years: {}. Try one of these or remove the year filter.",
                    available_years.join(", ")
                )
            };
        }
    }

    if lowered.contains(" like ") {
        return "No exact matches found for that name. Try a shorter keyword or check the spelling.".to_string();
    }

    "No results found. The filters may be too restrictive.".to_string()
}
