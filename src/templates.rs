//! Parameterized SQL templates
//!
//! Common question shapes (top-N, sum-by-group, totals, counts, listing a
//! year) are answered without a model call. A template only fires when every
//! content word of the question is accounted for by the shape, the chosen
//! table or a resolved column; otherwise the question goes to the model.
//! Only schema identifiers and parsed integers are interpolated.

use crate::schema::{ColumnDef, SemanticType, TableDef};
use crate::text;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

lazy_static::lazy_static! {
    static ref TOP_N: Regex = Regex::new(
        r"(?i)\b(?:top|largest|biggest|highest)\s+(?P<n>\d{1,4})\s+(?P<group>[a-z][a-z_ ]*?)(?:\s+by\s+(?P<measure>[a-z][a-z_ ]*?))?\s*(?:\b(?:in|for|during|of)\b|[?.!,]|$)"
    ).expect("valid regex");

    static ref SUM_BY: Regex = Regex::new(
        r"(?i)\b(?:total|sum of|sum)\s+(?P<measure>[a-z][a-z_ ]*?)\s+(?:by|per|for each|for every)\s+(?P<group>[a-z][a-z_ ]*?)\s*(?:\b(?:in|for|during)\b|[?.!,]|$)"
    ).expect("valid regex");

    static ref TOTAL: Regex = Regex::new(
        r"(?i)\b(?:total|sum of)\s+(?P<measure>[a-z][a-z_ ]*?)\s*(?:\b(?:in|for|during|was|were|is)\b|[?.!,]|$)"
    ).expect("valid regex");

    static ref COUNT: Regex = Regex::new(
        r"(?i)\bhow many\s+(?P<what>[a-z][a-z_ ]*?)\s*(?:\b(?:were|was|are|is|did|do|does|have|has|had|in|for|during|received|got)\b|[?.!,]|$)"
    ).expect("valid regex");

    static ref LIST: Regex = Regex::new(r"(?i)^\s*(?:show|list|display|give me)\b").expect("valid regex");

    static ref YEAR: Regex = Regex::new(r"(?i)\b(?:fy\s*)?((?:19|20)\d{2})\b").expect("valid regex");

    // Words that never need a column of their own.
    static ref FILLER: HashSet<&'static str> = [
        "record", "row", "entry", "transaction", "year", "fy", "amount", "value",
        "money", "dollar", "made", "paid", "spent", "overall", "altogether",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TemplateShape {
    TopN { n: usize },
    SumByGroup,
    Total,
    Count,
    ListByYear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMatch {
    #[serde(flatten)]
    pub shape: TemplateShape,
    pub sql: String,
}

/// Try every template shape against the question for one table
pub fn match_template(question: &str, table: &TableDef, row_limit: usize) -> Option<TemplateMatch> {
    let years: Vec<&str> = YEAR
        .captures_iter(question)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();
    // Ranges and comparisons need real filtering logic.
    if years.len() > 1 {
        return None;
    }
    let year = years.first().copied();
    let where_clause = match year {
        Some(y) => format!(" WHERE {} = '{}'", table.year_column()?.name, y),
        None => String::new(),
    };

    if let Some(caps) = TOP_N.captures(question) {
        let n: usize = caps.name("n")?.as_str().parse().ok()?;
        if n == 0 {
            return None;
        }
        let group_phrase = caps.name("group")?.as_str();
        let group = resolve_column(group_phrase, table, |c| c.semantic_type == SemanticType::Text)?;
        let measure = match caps.name("measure") {
            Some(m) => resolve_column(m.as_str(), table, |c| c.semantic_type.is_measure())?,
            None => table.measure()?,
        };
        if !all_words_consumed(question, table, &[group, measure]) {
            return None;
        }
        let sql = format!(
            "SELECT {g}, SUM({m}) AS total FROM {t}{w} GROUP BY {g} ORDER BY total DESC LIMIT {n}",
            g = group.name,
            m = measure.numeric_expr(),
            t = table.name,
            w = where_clause,
            n = n.min(row_limit),
        );
        return Some(TemplateMatch {
            shape: TemplateShape::TopN { n },
            sql,
        });
    }

    if let Some(caps) = SUM_BY.captures(question) {
        let measure_phrase = caps.name("measure")?.as_str();
        let group_phrase = caps.name("group")?.as_str();
        let measure = resolve_column(measure_phrase, table, |c| c.semantic_type.is_measure())?;
        let group = resolve_column(group_phrase, table, |c| c.semantic_type == SemanticType::Text)?;
        if !all_words_consumed(question, table, &[group, measure]) {
            return None;
        }
        let sql = format!(
            "SELECT {g}, SUM({m}) AS total FROM {t}{w} GROUP BY {g} ORDER BY total DESC",
            g = group.name,
            m = measure.numeric_expr(),
            t = table.name,
            w = where_clause,
        );
        return Some(TemplateMatch {
            shape: TemplateShape::SumByGroup,
            sql,
        });
    }

    if let Some(caps) = COUNT.captures(question) {
        let what = caps.name("what")?.as_str();
        let distinct = resolve_column(what, table, |c| c.semantic_type == SemanticType::Text);
        let sql = match distinct {
            Some(column) => format!(
                "SELECT COUNT(DISTINCT {}) AS total_count FROM {}{}",
                column.name, table.name, where_clause
            ),
            None if names_table(what, table) => {
                format!("SELECT COUNT(*) AS total_count FROM {}{}", table.name, where_clause)
            }
            None => return None,
        };
        let resolved: Vec<&ColumnDef> = distinct.into_iter().collect();
        if !all_words_consumed(question, table, &resolved) {
            return None;
        }
        return Some(TemplateMatch {
            shape: TemplateShape::Count,
            sql,
        });
    }

    if let Some(caps) = TOTAL.captures(question) {
        let measure_phrase = caps.name("measure")?.as_str();
        let measure = resolve_column(measure_phrase, table, |c| c.semantic_type.is_measure())
            .or_else(|| names_table(measure_phrase, table).then(|| table.measure()).flatten())?;
        if !all_words_consumed(question, table, &[measure]) {
            return None;
        }
        let sql = format!(
            "SELECT SUM({}) AS total FROM {}{}",
            measure.numeric_expr(),
            table.name,
            where_clause
        );
        return Some(TemplateMatch {
            shape: TemplateShape::Total,
            sql,
        });
    }

    if LIST.is_match(question) && year.is_some() && all_words_consumed(question, table, &[]) {
        let sql = format!("SELECT * FROM {}{} LIMIT {}", table.name, where_clause, row_limit);
        return Some(TemplateMatch {
            shape: TemplateShape::ListByYear,
            sql,
        });
    }

    None
}

/// Column of `table` best named by `phrase` (names and aliases only)
pub fn resolve_column<'a>(
    phrase: &str,
    table: &'a TableDef,
    accept: impl Fn(&ColumnDef) -> bool,
) -> Option<&'a ColumnDef> {
    let mut words = text::keywords(phrase);
    if words.is_empty() {
        words = text::terms(phrase);
    }
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(&ColumnDef, f64)> = None;
    for column in table.columns.iter().filter(|c| accept(c)) {
        let vocabulary = column_vocabulary(column);
        let score: f64 = words
            .iter()
            .map(|w| text::best_similarity(w, &vocabulary))
            .sum();
        if score > best.map(|(_, s)| s).unwrap_or(0.0) {
            best = Some((column, score));
        }
    }
    best.map(|(column, _)| column)
}

/// Phrase refers to the table's rows as a whole ("payments", "records")
fn names_table(phrase: &str, table: &TableDef) -> bool {
    let vocabulary = table_vocabulary(table);
    let words = text::keywords(phrase);
    !words.is_empty()
        && words.iter().all(|w| {
            FILLER.contains(w.as_str()) || text::best_similarity(w, &vocabulary) >= text::FUZZY_THRESHOLD
        })
}

fn table_vocabulary(table: &TableDef) -> Vec<String> {
    let mut vocabulary = text::identifier_terms(&table.name);
    vocabulary.extend(table.keywords.iter().flat_map(|k| text::terms(k)));
    vocabulary
}

fn column_vocabulary(column: &ColumnDef) -> Vec<String> {
    let mut vocabulary = text::identifier_terms(&column.name);
    vocabulary.extend(column.aliases.iter().flat_map(|a| text::terms(a)));
    vocabulary
}

/// Every content word is explained by a resolved column, the table or filler
fn all_words_consumed(question: &str, table: &TableDef, columns: &[&ColumnDef]) -> bool {
    let column_words: Vec<String> = columns.iter().flat_map(|c| column_vocabulary(c)).collect();
    let table_words = table_vocabulary(table);

    text::keywords(question).iter().all(|word| {
        FILLER.contains(word.as_str())
            || text::best_similarity(word, &column_words) > 0.0
            || text::best_similarity(word, &table_words) >= text::FUZZY_THRESHOLD
    })
}
