//! Table selection
//!
//! Scores each known table against the question's keywords. The result is
//! always a member of the schema; ties go to the table declared first.

use crate::error::{PlannerError, Result};
use crate::schema::{SchemaDescriptor, TableDef};
use crate::text;
use serde::Serialize;
use tracing::{debug, warn};

const NAME_WEIGHT: f64 = 3.0;
const KEYWORD_WEIGHT: f64 = 3.0;
const COLUMN_WEIGHT: f64 = 2.0;
const DESCRIPTION_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Serialize)]
pub struct TableScore {
    pub table: String,
    pub score: f64,
}

/// Weighted vocabulary of one table
struct Vocabulary {
    entries: Vec<(String, f64)>,
}

impl Vocabulary {
    fn for_table(table: &TableDef) -> Self {
        let mut entries = Vec::new();
        entries.extend(text::identifier_terms(&table.name).into_iter().map(|t| (t, NAME_WEIGHT)));
        entries.extend(
            table
                .keywords
                .iter()
                .flat_map(|k| text::terms(k))
                .map(|t| (t, KEYWORD_WEIGHT)),
        );
        entries.extend(text::keywords(&table.description).into_iter().map(|t| (t, DESCRIPTION_WEIGHT)));
        for column in &table.columns {
            entries.extend(text::identifier_terms(&column.name).into_iter().map(|t| (t, COLUMN_WEIGHT)));
            entries.extend(
                column
                    .aliases
                    .iter()
                    .flat_map(|a| text::terms(a))
                    .map(|t| (t, COLUMN_WEIGHT)),
            );
            entries.extend(text::keywords(&column.description).into_iter().map(|t| (t, DESCRIPTION_WEIGHT)));
        }
        Self { entries }
    }

    fn score(&self, term: &str) -> f64 {
        self.entries
            .iter()
            .map(|(entry, weight)| weight * text::term_similarity(term, entry))
            .fold(0.0, f64::max)
    }
}

/// Score every table, in schema order
pub fn score_tables(question: &str, schema: &SchemaDescriptor) -> Vec<TableScore> {
    let keywords = text::keywords(question);
    schema
        .tables()
        .iter()
        .map(|table| {
            let vocabulary = Vocabulary::for_table(table);
            let score = keywords.iter().map(|k| vocabulary.score(k)).sum();
            TableScore {
                table: table.name.clone(),
                score,
            }
        })
        .collect()
}

/// Pick the most relevant table for a question
pub fn select_table(question: &str, schema: &SchemaDescriptor) -> Result<String> {
    let scores = score_tables(question, schema);
    debug!("Table scores for {:?}: {:?}", question, scores);

    // Strictly-greater keeps the earliest table on ties.
    let mut best: Option<&TableScore> = None;
    for candidate in &scores {
        if candidate.score > best.map(|b| b.score).unwrap_or(0.0) {
            best = Some(candidate);
        }
    }

    match best {
        Some(winner) => Ok(winner.table.clone()),
        None => match schema.default_table() {
            Some(default) => {
                warn!(
                    "No table matched {:?}, falling back to default table {}",
                    question, default.name
                );
                Ok(default.name.clone())
            }
            None => Err(PlannerError::UnknownTable(format!(
                "no table matches the question {:?} (known tables: {})",
                question,
                schema.table_names().join(", ")
            ))),
        },
    }
}

/// Infer the table an already-written statement targets
pub fn select_table_for_sql(sql: &str, schema: &SchemaDescriptor) -> Result<String> {
    let lowered = sql.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();

    for table in schema.tables() {
        let name = table.name.to_lowercase();
        if words.iter().any(|w| *w == name) {
            return Ok(table.name.clone());
        }
    }

    match schema.default_table() {
        Some(default) => {
            warn!("No known table in SQL, defaulting to {}", default.name);
            Ok(default.name.clone())
        }
        None => Err(PlannerError::UnknownTable(
            "statement references no known table".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, SemanticType};

    fn two_equal_tables() -> SchemaDescriptor {
        let make = |name: &str| TableDef {
            name: name.to_string(),
            description: "Spending records".to_string(),
            keywords: vec![],
            columns: vec![ColumnDef::new("amount", SemanticType::Real, "")],
            primary_measure: None,
            source_columns: vec![],
        };
        SchemaDescriptor::new(vec![make("first_ledger"), make("second_ledger")], None).unwrap()
    }

    #[test]
    fn test_agencies_by_spending_picks_payments() {
        let schema = SchemaDescriptor::state_finance();
        let table = select_table("What are the top 5 agencies by spending?", &schema).unwrap();
        assert_eq!(table, "vendor_payments");
        let def = schema.table(&table).unwrap();
        assert!(def.columns.iter().any(|c| c.name.contains("agency")));
    }

    #[test]
    fn test_budget_questions_pick_budget() {
        let schema = SchemaDescriptor::state_finance();
        assert_eq!(
            select_table("Which committee has the largest net appropriations?", &schema).unwrap(),
            "budget"
        );
        assert_eq!(
            select_table("How much was budgeted for receipts in 2025?", &schema).unwrap(),
            "budget"
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let schema = SchemaDescriptor::state_finance();
        let question = "total spending by department";
        let first = select_table(question, &schema).unwrap();
        for _ in 0..20 {
            assert_eq!(select_table(question, &schema).unwrap(), first);
        }
    }

    #[test]
    fn test_ties_go_to_first_table() {
        let schema = two_equal_tables();
        assert_eq!(select_table("show me the amount", &schema).unwrap(), "first_ledger");
    }

    #[test]
    fn test_no_match_uses_default_or_fails() {
        let schema = SchemaDescriptor::state_finance();
        assert_eq!(select_table("hello there", &schema).unwrap(), "vendor_payments");

        let no_default = two_equal_tables();
        assert!(matches!(
            select_table("zebra xylophone", &no_default),
            Err(PlannerError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_select_table_for_sql() {
        let schema = SchemaDescriptor::state_finance();
        assert_eq!(
            select_table_for_sql("SELECT * FROM BUDGET WHERE committee = 'Education'", &schema).unwrap(),
            "budget"
        );
        assert_eq!(
            select_table_for_sql("SELECT * FROM unknown_table", &schema).unwrap(),
            "vendor_payments"
        );
    }
}
