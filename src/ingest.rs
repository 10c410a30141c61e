//! CSV ingestion
//!
//! Loads CSV exports into the SQLite file the executor reads. Tables are
//! created from the schema descriptor, so the database always matches what
//! the planner believes exists.

use crate::error::{PlannerError, Result};
use crate::schema::{SchemaDescriptor, TableDef};
use itertools::Itertools;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub table: String,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    /// CSV column index feeding each table column, in table column order
    pub column_sources: Vec<Option<usize>>,
}

/// `CREATE TABLE IF NOT EXISTS` statement for a table
pub fn create_table_sql(table: &TableDef) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("\"{}\" {}", c.name, c.semantic_type.sqlite_affinity()))
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        table.name, columns
    )
}

/// Create every table of the descriptor in the database file
pub fn create_tables(db_path: impl AsRef<Path>, schema: &SchemaDescriptor) -> Result<()> {
    let conn = Connection::open(db_path.as_ref())?;
    for table in schema.tables() {
        conn.execute(&create_table_sql(table), [])?;
    }
    Ok(())
}

/// Load one CSV file into a table.
///
/// Headers are matched to columns by normalized name or alias. When no header
/// matches, fields are taken by position in the table's `source_columns`
/// order, or its column order when none is recorded.
/// With `replace`, existing rows are deleted first. Everything runs in one
/// transaction.
pub fn ingest_csv(
    db_path: impl AsRef<Path>,
    schema: &SchemaDescriptor,
    table_name: &str,
    csv_path: impl AsRef<Path>,
    replace: bool,
) -> Result<IngestReport> {
    let table = schema
        .table(table_name)
        .ok_or_else(|| PlannerError::UnknownTable(table_name.to_string()))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_path.as_ref())?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let sources = map_headers(table, &headers);
    let required = sources.iter().flatten().max().map(|m| m + 1).unwrap_or(0);

    let mut conn = Connection::open(db_path.as_ref())?;
    conn.execute(&create_table_sql(table), [])?;

    let tx = conn.transaction()?;
    if replace {
        tx.execute(&format!("DELETE FROM \"{}\"", table.name), [])?;
    }

    let insert = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table.name,
        table.columns.iter().map(|c| format!("\"{}\"", c.name)).join(", "),
        (1..=table.columns.len()).map(|i| format!("?{}", i)).join(", ")
    );

    let mut inserted = 0;
    let mut skipped = 0;
    {
        let mut stmt = tx.prepare(&insert)?;
        for record in reader.records() {
            let record = record?;
            if record.len() < required {
                skipped += 1;
                continue;
            }
            let values = sources
                .iter()
                .map(|source| source.and_then(|i| record.get(i)).map(|v| v.trim().to_string()));
            stmt.execute(params_from_iter(values))?;
            inserted += 1;
            if inserted % 1000 == 0 {
                info!("Imported {} rows into {}...", inserted, table.name);
            }
        }
    }
    tx.commit()?;

    if skipped > 0 {
        warn!("Skipped {} short rows while loading {}", skipped, table.name);
    }
    info!("✅ Loaded {} rows into {}", inserted, table.name);

    Ok(IngestReport {
        table: table.name.clone(),
        rows_inserted: inserted,
        rows_skipped: skipped,
        column_sources: sources,
    })
}

fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|p| !p.is_empty())
        .join("_")
}

fn map_headers(table: &TableDef, headers: &[String]) -> Vec<Option<usize>> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

    let by_name: Vec<Option<usize>> = table
        .columns
        .iter()
        .map(|column| {
            let mut names = vec![column.name.to_lowercase()];
            names.extend(column.aliases.iter().map(|a| normalize_header(a)));
            normalized.iter().position(|h| names.contains(h))
        })
        .collect();

    if by_name.iter().any(Option::is_some) {
        return by_name;
    }

    warn!(
        "No CSV header matches a column of {}, mapping columns by source field order",
        table.name
    );
    table
        .source_positions()
        .into_iter()
        .map(|p| p.filter(|&i| i < headers.len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str, ext: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}.{}", name, uuid::Uuid::new_v4(), ext))
    }

    fn write_csv(contents: &str) -> std::path::PathBuf {
        let path = temp_path("ingest", "csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_headers_map_by_name_and_alias() {
        let schema = SchemaDescriptor::state_finance();
        let csv_path = write_csv(
            "\u{feff}Vendor,Payment,Fiscal Year,Agency\nAcme,\"$1,200.00\",2025,Transportation\nShort\n",
        );
        let db = temp_path("ingest", "db");

        let report = ingest_csv(&db, &schema, "vendor_payments", &csv_path, false).unwrap();
        assert_eq!(report.rows_inserted, 1);
        assert_eq!(report.rows_skipped, 1);

        let conn = Connection::open(&db).unwrap();
        let (vendor, payment, year): (String, String, String) = conn
            .query_row(
                "SELECT vendor_recipient, payment, fiscal_year FROM vendor_payments",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(vendor, "Acme");
        assert_eq!(payment, "$1,200.00");
        assert_eq!(year, "2025");

        std::fs::remove_file(csv_path).ok();
        std::fs::remove_file(db).ok();
    }

    #[test]
    fn test_positional_fallback_and_replace() {
        let schema = SchemaDescriptor::state_finance();
        // Budget exports carry fiscal_year last.
        let csv_path = write_csv(
            "c1,c2,c3,c4,c5,c6,c7,c8,c9,c10,c11\n\
             Education,Public Schools,13510,Salaries,1000,$5.00,$0.00,$5.00,Recurring,General,2024\n\
             Health,Medicaid,14440,Grants,1000,$9.00,$1.00,$8.00,Recurring,General,2025\n",
        );
        let db = temp_path("ingest", "db");

        ingest_csv(&db, &schema, "budget", &csv_path, false).unwrap();
        let report = ingest_csv(&db, &schema, "budget", &csv_path, true).unwrap();
        assert_eq!(report.column_sources[0], Some(10));
        assert_eq!(report.column_sources[1], Some(0));

        let conn = Connection::open(&db).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM budget", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        let committee: String = conn
            .query_row("SELECT committee FROM budget WHERE fiscal_year = '2025'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(committee, "Health");

        std::fs::remove_file(csv_path).ok();
        std::fs::remove_file(db).ok();
    }

    #[test]
    fn test_unmatched_vendor_headers_follow_export_order() {
        let schema = SchemaDescriptor::state_finance();
        let csv_path = write_csv(
            "x1,x2,x3,x4,x5,x6,x7,x8,x9,x10,x11\n\
             2025,General,2024-2025,\"$1,200.00\",Acme,Supplies,Operations,14100,Vendor Report,Paper,Transportation\n",
        );
        let db = temp_path("ingest", "db");

        let report = ingest_csv(&db, &schema, "vendor_payments", &csv_path, false).unwrap();
        assert_eq!(report.rows_inserted, 1);
        assert!(!report.column_sources.contains(&Some(0)));

        let conn = Connection::open(&db).unwrap();
        let (year, payment, vendor, agency): (String, String, String, String) = conn
            .query_row(
                "SELECT fiscal_year, payment, vendor_recipient, agency_description FROM vendor_payments",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(year, "2024-2025");
        assert_eq!(payment, "$1,200.00");
        assert_eq!(vendor, "Acme");
        assert_eq!(agency, "Transportation");

        std::fs::remove_file(csv_path).ok();
        std::fs::remove_file(db).ok();
    }

    #[test]
    fn test_unknown_table_rejected() {
        let schema = SchemaDescriptor::state_finance();
        let csv_path = write_csv("x\n1\n");
        let err = ingest_csv(temp_path("ingest", "db"), &schema, "users", &csv_path, false).unwrap_err();
        assert!(matches!(err, PlannerError::UnknownTable(_)));
        std::fs::remove_file(csv_path).ok();
    }

    #[test]
    fn test_create_table_sql_uses_affinities() {
        let schema = SchemaDescriptor::state_finance();
        let sql = create_table_sql(schema.table("budget").unwrap());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"budget\""));
        assert!(sql.contains("\"expenditures\" TEXT"));
    }
}
