//! SQL Sanitizer
//!
//! Allow-list-biased filter applied to every candidate statement before it
//! reaches the database. Rules run in a fixed order and the first failure
//! rejects:
//!
//! 1. exactly one `SELECT` (or `WITH … SELECT`) statement
//! 2. no deny-listed keyword as a whole token (comments and quoted
//!    identifiers included, string literals excluded)
//! 3. every referenced table is in the schema (or is a CTE), and no
//!    `sqlite_` internal table is named
//! 4. length bound
//! 5. when `sqlparser` can parse the statement, the AST must agree with 1 and 3;
//!    when it cannot, the token scan of every FROM list must have succeeded
//!
//! `sanitize_within` additionally holds the statement to the tables a caller
//! selected.
//!
//! This is a token filter, not a SQL grammar. It guards against a
//! cooperative-but-fallible generator; it is not a sandbox against adversarial
//! input. The read-only connection in `executor` is the second line.

use crate::schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{visit_relations, ObjectName, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::debug;

/// Keywords that reject a statement wherever they appear as a token
pub const DENY_LIST: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH",
    "PRAGMA", "GRANT", "REVOKE", "TRUNCATE", "MERGE", "UPSERT", "VACUUM", "REINDEX",
    "ANALYZE", "EXEC", "EXECUTE", "CALL", "COPY", "INTO", "LOAD_EXTENSION",
    "SAVEPOINT", "RELEASE", "ROLLBACK", "COMMIT", "BEGIN",
];

lazy_static::lazy_static! {
    static ref DENIED: HashSet<&'static str> = DENY_LIST.iter().copied().collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    StringLiteral,
    QuotedIdentifier,
    Comment,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Word text, literal/identifier contents without quotes, comment body,
    /// or the punctuation character
    pub text: &'a str,
}

impl<'a> Token<'a> {
    fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    fn is_punct(&self, c: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == c
    }

    fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdentifier)
    }
}

/// Split SQL into tokens. Fails on unterminated literals or quoted identifiers.
pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, String> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            let start = i + 2;
            let end = sql[start..].find('\n').map(|p| start + p).unwrap_or(bytes.len());
            tokens.push(Token { kind: TokenKind::Comment, text: &sql[start..end] });
            i = end;
            continue;
        }

        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let start = i + 2;
            let (end, next) = match sql[start..].find("*/") {
                Some(p) => (start + p, start + p + 2),
                None => (bytes.len(), bytes.len()),
            };
            tokens.push(Token { kind: TokenKind::Comment, text: &sql[start..end] });
            i = next;
            continue;
        }

        if b == b'\'' || b == b'"' || b == b'`' || b == b'[' {
            let close = if b == b'[' { b']' } else { b };
            let start = i + 1;
            let mut j = start;
            let mut closed = false;
            while j < bytes.len() {
                if bytes[j] == close {
                    // Doubled quote is an escaped quote, except for brackets.
                    if close != b']' && bytes.get(j + 1) == Some(&close) {
                        j += 2;
                        continue;
                    }
                    closed = true;
                    break;
                }
                j += 1;
            }
            if !closed {
                return Err(if b == b'\'' {
                    "unterminated string literal".to_string()
                } else {
                    "unterminated quoted identifier".to_string()
                });
            }
            let kind = if b == b'\'' {
                TokenKind::StringLiteral
            } else {
                TokenKind::QuotedIdentifier
            };
            tokens.push(Token { kind, text: &sql[start..j] });
            i = j + 1;
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' || b >= 0x80 {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$' || bytes[i] >= 0x80)
            {
                i += 1;
            }
            tokens.push(Token { kind: TokenKind::Word, text: &sql[start..i] });
            continue;
        }

        if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).map_or(false, |n| n.is_ascii_digit())) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            tokens.push(Token { kind: TokenKind::Number, text: &sql[start..i] });
            continue;
        }

        tokens.push(Token { kind: TokenKind::Punct, text: &sql[i..i + 1] });
        i += 1;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeRule {
    SingleSelect,
    DenyList,
    UnknownTable,
    Length,
    Structure,
    TableScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rule: SanitizeRule,
    pub reason: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedSql {
    /// Known tables the statement reads, canonical names, first-seen order
    pub tables: Vec<String>,
    /// Non-blocking advisories
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted(AcceptedSql),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    fn reject(rule: SanitizeRule, reason: impl Into<String>) -> Self {
        Verdict::Rejected(Rejection {
            rule,
            reason: reason.into(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqlSanitizer {
    schema: Arc<SchemaDescriptor>,
    max_length: usize,
}

impl SqlSanitizer {
    pub fn new(schema: Arc<SchemaDescriptor>, max_length: usize) -> Self {
        Self { schema, max_length }
    }

    pub fn sanitize(&self, sql: &str) -> Verdict {
        self.sanitize_within(sql, &[])
    }

    /// Sanitize, then hold an accepted statement to the `allowed` tables.
    /// An empty `allowed` list places no extra restriction.
    pub fn sanitize_within(&self, sql: &str, allowed: &[String]) -> Verdict {
        let verdict = match self.check(sql) {
            Verdict::Accepted(accepted) if !allowed.is_empty() => {
                let outside: Vec<String> = accepted
                    .tables
                    .iter()
                    .filter(|t| !allowed.iter().any(|a| a.eq_ignore_ascii_case(t.as_str())))
                    .cloned()
                    .collect();
                if outside.is_empty() {
                    Verdict::Accepted(accepted)
                } else {
                    Verdict::reject(
                        SanitizeRule::TableScope,
                        format!(
                            "reads table(s) outside {}: {}",
                            allowed.join(", "),
                            outside.join(", ")
                        ),
                    )
                }
            }
            other => other,
        };
        if let Verdict::Rejected(r) = &verdict {
            debug!("Rejected SQL ({:?}): {}", r.rule, r.reason);
        }
        verdict
    }

    fn check(&self, sql: &str) -> Verdict {
        // Rule 1: a single SELECT statement
        if sql.trim().is_empty() {
            return Verdict::reject(SanitizeRule::SingleSelect, "empty statement");
        }
        if sql.contains('\0') {
            return Verdict::reject(SanitizeRule::SingleSelect, "statement contains a NUL byte");
        }
        let tokens = match tokenize(sql) {
            Ok(t) => t,
            Err(e) => return Verdict::reject(SanitizeRule::SingleSelect, format!("malformed statement: {}", e)),
        };
        let significant: Vec<&Token> = tokens.iter().filter(|t| t.kind != TokenKind::Comment).collect();

        let first = match significant.first() {
            Some(t) => t,
            None => return Verdict::reject(SanitizeRule::SingleSelect, "empty statement"),
        };
        if !(first.is_word("SELECT") || first.is_word("WITH")) {
            return Verdict::reject(
                SanitizeRule::SingleSelect,
                format!("only SELECT statements are allowed (statement starts with {:?})", first.text),
            );
        }
        if let Some(pos) = significant.iter().position(|t| t.is_punct(";")) {
            if significant[pos..].iter().any(|t| !t.is_punct(";")) {
                return Verdict::reject(SanitizeRule::SingleSelect, "multiple statements are not allowed");
            }
        }
        if first.is_word("WITH") && !significant.iter().any(|t| t.is_word("SELECT")) {
            return Verdict::reject(SanitizeRule::SingleSelect, "WITH clause is not followed by a SELECT");
        }

        // Rule 2: deny-listed keywords
        let denied = denied_keywords(&tokens);
        if !denied.is_empty() {
            return Verdict::reject(
                SanitizeRule::DenyList,
                format!("forbidden keyword(s): {}", denied.join(", ")),
            );
        }

        // Rule 3: only known tables
        let ctes = cte_names(&significant);
        let internal = internal_tables(&significant);
        if !internal.is_empty() {
            return Verdict::reject(
                SanitizeRule::UnknownTable,
                format!("references internal table(s): {}", internal.join(", ")),
            );
        }
        let scan = table_references(&significant);
        let unknown = self.unknown_tables(scan.references.iter().map(String::as_str), &ctes);
        if !unknown.is_empty() {
            return Verdict::reject(
                SanitizeRule::UnknownTable,
                format!("references unknown table(s): {}", unknown.join(", ")),
            );
        }

        // Rule 4: length bound
        let length = sql.chars().count();
        if length > self.max_length {
            return Verdict::reject(
                SanitizeRule::Length,
                format!("statement is {} characters (limit {})", length, self.max_length),
            );
        }

        // Rule 5: the parser's view must agree when it has one
        let mut warnings = Vec::new();
        match Parser::parse_sql(&SQLiteDialect {}, sql) {
            Ok(statements) => {
                if statements.len() != 1 {
                    return Verdict::reject(
                        SanitizeRule::Structure,
                        format!("expected one statement, parser found {}", statements.len()),
                    );
                }
                if !matches!(statements[0], Statement::Query(_)) {
                    return Verdict::reject(SanitizeRule::Structure, "statement is not a query");
                }
                let mut relations: Vec<String> = Vec::new();
                let _ = visit_relations(&statements[0], |relation: &ObjectName| {
                    if let Some(ident) = relation.0.last() {
                        relations.push(ident.value.clone());
                    }
                    ControlFlow::<()>::Continue(())
                });
                let unknown = self.unknown_tables(relations.iter().map(String::as_str), &ctes);
                if !unknown.is_empty() {
                    return Verdict::reject(
                        SanitizeRule::Structure,
                        format!("references unknown table(s): {}", unknown.join(", ")),
                    );
                }
            }
            Err(e) if scan.complete => warnings.push(format!("statement could not be parsed structurally: {}", e)),
            Err(e) => {
                return Verdict::reject(
                    SanitizeRule::Structure,
                    format!("FROM clause not understood and statement could not be parsed: {}", e),
                )
            }
        }

        if !significant.iter().any(|t| t.is_word("WHERE") || t.is_word("LIMIT")) {
            warnings.push("query has no WHERE or LIMIT clause (full table scan)".to_string());
        }

        let mut tables: Vec<String> = Vec::new();
        for reference in &scan.references {
            if let Some(table) = self.schema.table(reference) {
                if !tables.contains(&table.name) {
                    tables.push(table.name.clone());
                }
            }
        }

        Verdict::Accepted(AcceptedSql { tables, warnings })
    }

    fn unknown_tables<'s>(&self, references: impl Iterator<Item = &'s str>, ctes: &HashSet<String>) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for reference in references {
            let lowered = reference.to_lowercase();
            if !self.schema.is_known_table(reference) && !ctes.contains(&lowered) && !unknown.contains(&lowered) {
                unknown.push(lowered);
            }
        }
        unknown
    }
}

/// Deny-listed words in words, quoted identifiers and comments, first-seen order
fn denied_keywords(tokens: &[Token]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut check = |word: &str| {
        let upper = word.to_ascii_uppercase();
        if DENIED.contains(upper.as_str()) && !found.contains(&upper) {
            found.push(upper);
        }
    };

    for token in tokens {
        match token.kind {
            TokenKind::Word => check(token.text),
            TokenKind::QuotedIdentifier | TokenKind::Comment => {
                for word in token
                    .text
                    .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .filter(|w| !w.is_empty())
                {
                    check(word);
                }
            }
            _ => {}
        }
    }
    found
}

/// Names defined by `name AS (` or `name(cols) AS (`
fn cte_names(tokens: &[&Token]) -> HashSet<String> {
    let mut names = HashSet::new();
    for (i, token) in tokens.iter().enumerate() {
        if !token.is_word("AS") || i == 0 {
            continue;
        }
        let opens_body = match tokens.get(i + 1) {
            Some(next) if next.is_punct("(") => true,
            Some(next) if next.is_word("MATERIALIZED") || next.is_word("NOT") => true,
            _ => false,
        };
        if !opens_body {
            continue;
        }

        let prev = tokens[i - 1];
        if prev.is_identifier() {
            names.insert(prev.text.to_lowercase());
        } else if prev.is_punct(")") {
            let mut depth = 0usize;
            let mut j = i - 1;
            loop {
                if tokens[j].is_punct(")") {
                    depth += 1;
                } else if tokens[j].is_punct("(") {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                if j == 0 {
                    break;
                }
                j -= 1;
            }
            if depth == 0 && j > 0 && tokens[j - 1].is_identifier() {
                names.insert(tokens[j - 1].text.to_lowercase());
            }
        }
    }
    names
}

/// Tables a statement reads, and whether every FROM item was understood
#[derive(Debug)]
struct TableScan {
    references: Vec<String>,
    complete: bool,
}

/// Words that close a FROM clause at its own nesting level
const FROM_END_WORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "WINDOW", "UNION", "EXCEPT",
    "INTERSECT", "RETURNING",
];

/// SQLite accepts a string literal where a table name is expected.
fn names_relation(token: &Token) -> bool {
    token.is_identifier() || token.kind == TokenKind::StringLiteral
}

/// Last part of a dotted name starting at `start`, and the index after it
fn qualified_name(tokens: &[&Token], start: usize) -> (String, usize) {
    let mut name = tokens[start].text;
    let mut j = start + 1;
    while j + 1 < tokens.len() && tokens[j].is_punct(".") && names_relation(tokens[j + 1]) {
        name = tokens[j + 1].text;
        j += 2;
    }
    (name.to_string(), j)
}

/// Open parentheses around each token; a `)` shares its `(`'s depth
fn paren_depths(tokens: &[&Token]) -> Vec<usize> {
    let mut depth = 0usize;
    let mut depths = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.is_punct(")") {
            depth = depth.saturating_sub(1);
        }
        depths.push(depth);
        if token.is_punct("(") {
            depth += 1;
        }
    }
    depths
}

/// Table names read through `FROM` lists, joins and `expr IN table`
fn table_references(tokens: &[&Token]) -> TableScan {
    let depths = paren_depths(tokens);
    let mut scan = TableScan {
        references: Vec::new(),
        complete: true,
    };

    for (i, token) in tokens.iter().enumerate() {
        if token.is_word("FROM") {
            scan_from_clause(tokens, &depths, i + 1, depths[i], &mut scan);
        } else if token.is_word("IN") && tokens.get(i + 1).map_or(false, |t| names_relation(t)) {
            let (name, _) = qualified_name(tokens, i + 1);
            scan.references.push(name);
        }
    }

    scan
}

/// Walk one FROM list at nesting level `depth`. Items start the list and
/// follow each `,` or `JOIN`; everything else (aliases, `ON` expressions,
/// `INDEXED BY`) is skipped. Derived tables are read by their own `FROM`.
fn scan_from_clause(tokens: &[&Token], depths: &[usize], start: usize, depth: usize, scan: &mut TableScan) {
    let mut expecting_item = true;
    let mut k = start;

    while k < tokens.len() && depths[k] >= depth {
        let token = tokens[k];
        if depths[k] > depth {
            k += 1;
            continue;
        }
        if token.is_punct(";") {
            break;
        }
        if token.kind == TokenKind::Word
            && FROM_END_WORDS.iter().any(|w| token.text.eq_ignore_ascii_case(w))
        {
            break;
        }

        if expecting_item {
            expecting_item = false;
            if names_relation(token) {
                let (name, next) = qualified_name(tokens, k);
                scan.references.push(name);
                k = next;
                continue;
            }
            if token.is_punct("(") {
                let subquery = tokens
                    .get(k + 1)
                    .map_or(false, |t| t.is_word("SELECT") || t.is_word("WITH") || t.is_word("VALUES"));
                if !subquery {
                    // Parenthesized join list
                    scan_from_clause(tokens, depths, k + 1, depth + 1, scan);
                }
                k += 1;
                continue;
            }
            scan.complete = false;
            return;
        }

        if token.is_punct(",") || token.is_word("JOIN") {
            expecting_item = true;
        }
        k += 1;
    }

    if expecting_item {
        scan.complete = false;
    }
}

/// Identifiers naming SQLite's own schema tables (`sqlite_master` and kin)
fn internal_tables(tokens: &[&Token]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        let lowered = token.text.to_lowercase();
        let is_call = tokens.get(i + 1).map_or(false, |t| t.is_punct("("));
        if token.is_identifier() && lowered.starts_with("sqlite_") && !is_call && !found.contains(&lowered) {
            found.push(lowered);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, SemanticType, TableDef};

    fn sanitizer() -> SqlSanitizer {
        SqlSanitizer::new(Arc::new(SchemaDescriptor::state_finance()), 4_000)
    }

    fn rejected_rule(sql: &str) -> SanitizeRule {
        match sanitizer().sanitize(sql) {
            Verdict::Rejected(r) => r.rule,
            Verdict::Accepted(a) => panic!("expected rejection for {:?}, accepted {:?}", sql, a),
        }
    }

    #[test]
    fn test_tokenize_skips_literal_contents() {
        let tokens = tokenize("SELECT 'a;b' -- note\nFROM t").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Word,
                TokenKind::StringLiteral,
                TokenKind::Comment,
                TokenKind::Word,
                TokenKind::Word
            ]
        );
        assert_eq!(tokens[1].text, "a;b");
        assert_eq!(tokens[2].text, " note");
    }

    #[test]
    fn test_tokenize_escaped_quote_and_unterminated() {
        let tokens = tokenize("SELECT 'it''s'").unwrap();
        assert_eq!(tokens[1].text, "it''s");
        assert!(tokenize("SELECT 'oops").is_err());
        assert!(tokenize("SELECT \"oops").is_err());
    }

    #[test]
    fn test_accepts_plain_select() {
        let verdict = sanitizer().sanitize("SELECT * FROM vendor_payments WHERE fiscal_year = '2025' LIMIT 10");
        match verdict {
            Verdict::Accepted(a) => {
                assert_eq!(a.tables, vec!["vendor_payments"]);
                assert!(a.warnings.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trailing_semicolon_allowed() {
        assert!(sanitizer().sanitize("SELECT * FROM vendor_payments;").is_accepted());
    }

    #[test]
    fn test_multi_statement_rejected() {
        assert_eq!(
            rejected_rule("SELECT * FROM vendor_payments; DROP TABLE vendor_payments;"),
            SanitizeRule::SingleSelect
        );
        assert_eq!(
            rejected_rule("SELECT * FROM vendor_payments; SELECT * FROM budget;"),
            SanitizeRule::SingleSelect
        );
    }

    #[test]
    fn test_non_select_rejected() {
        assert_eq!(rejected_rule("DROP TABLE vendor_payments"), SanitizeRule::SingleSelect);
        assert_eq!(rejected_rule("SHOW TABLES"), SanitizeRule::SingleSelect);
        assert_eq!(rejected_rule("   \n\t"), SanitizeRule::SingleSelect);
        assert_eq!(rejected_rule("-- only a comment"), SanitizeRule::SingleSelect);
    }

    #[test]
    fn test_deny_list_is_token_based() {
        assert_eq!(
            rejected_rule("select * from vendor_payments where x in (select 1) /* drop */"),
            SanitizeRule::DenyList
        );
        assert_eq!(
            rejected_rule("SELECT payment INTO backup FROM vendor_payments"),
            SanitizeRule::DenyList
        );
        assert_eq!(
            rejected_rule("SELECT \"delete\" FROM vendor_payments"),
            SanitizeRule::DenyList
        );
        // Substrings of identifiers and string contents are not tokens.
        assert!(sanitizer()
            .sanitize("SELECT updated_at FROM vendor_payments WHERE description LIKE '%update%' LIMIT 5")
            .is_accepted());
    }

    #[test]
    fn test_replace_function_allowed() {
        let sql = "SELECT vendor_recipient, SUM(CAST(REPLACE(REPLACE(payment, '$', ''), ',', '') AS REAL)) AS total \
                   FROM vendor_payments GROUP BY vendor_recipient ORDER BY total DESC LIMIT 5";
        assert!(sanitizer().sanitize(sql).is_accepted());
    }

    #[test]
    fn test_unknown_table_named_in_reason() {
        match sanitizer().sanitize("SELECT * FROM vendor_payments v JOIN secrets s ON v.id = s.id") {
            Verdict::Rejected(r) => {
                assert_eq!(r.rule, SanitizeRule::UnknownTable);
                assert!(r.reason.contains("secrets"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rejected_rule("SELECT name FROM sqlite_master"), SanitizeRule::UnknownTable);
        assert_eq!(
            rejected_rule("SELECT * FROM budget, users WHERE budget.agency = users.name"),
            SanitizeRule::UnknownTable
        );
        assert_eq!(
            rejected_rule("SELECT * FROM budget WHERE agency IN (SELECT name FROM staff)"),
            SanitizeRule::UnknownTable
        );
    }

    #[test]
    fn test_derived_table_does_not_hide_later_tables() {
        match sanitizer().sanitize("SELECT name FROM (SELECT 1) t, sqlite_master WHERE name GLOB '*'") {
            Verdict::Rejected(r) => {
                assert_eq!(r.rule, SanitizeRule::UnknownTable);
                assert!(r.reason.contains("sqlite_master"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match sanitizer().sanitize("SELECT * FROM (SELECT 1) t, secrets WHERE secret NOTNULL") {
            Verdict::Rejected(r) => {
                assert_eq!(r.rule, SanitizeRule::UnknownTable);
                assert!(r.reason.contains("secrets"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            rejected_rule("SELECT * FROM (budget JOIN secrets ON 1) LIMIT 1"),
            SanitizeRule::UnknownTable
        );
        assert_eq!(
            rejected_rule("SELECT * FROM budget WHERE agency IN secrets"),
            SanitizeRule::UnknownTable
        );
        assert_eq!(rejected_rule("SELECT * FROM 'sqlite_master'"), SanitizeRule::UnknownTable);

        let sql = "SELECT t.total, b.agency FROM (SELECT COUNT(*) AS total FROM vendor_payments) AS t, budget b LIMIT 1";
        match sanitizer().sanitize(sql) {
            Verdict::Accepted(a) => {
                assert!(a.tables.contains(&"vendor_payments".to_string()));
                assert!(a.tables.contains(&"budget".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_statement_sqlparser_cannot_read() {
        // GLOB is SQLite-only; the token rules still decide.
        let sql = "SELECT vendor_recipient FROM vendor_payments WHERE vendor_recipient GLOB 'A*' LIMIT 5";
        match sanitizer().sanitize(sql) {
            Verdict::Accepted(a) => {
                assert_eq!(a.tables, vec!["vendor_payments"]);
                assert!(a.warnings.iter().any(|w| w.contains("could not be parsed")));
            }
            other => panic!("unexpected {:?}", other),
        }

        match sanitizer().sanitize("SELECT * FROM secrets WHERE name GLOB '*'") {
            Verdict::Rejected(r) => {
                assert_eq!(r.rule, SanitizeRule::UnknownTable);
                assert!(r.reason.contains("secrets"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            rejected_rule("SELECT payment FROM 42 WHERE payment GLOB '1*'"),
            SanitizeRule::Structure
        );
        assert_eq!(
            rejected_rule("SELECT * FROM vendor_payments, WHERE payment GLOB '1*'"),
            SanitizeRule::Structure
        );
    }

    #[test]
    fn test_sanitize_within_selected_table() {
        let allowed = vec!["vendor_payments".to_string()];
        match sanitizer().sanitize_within("SELECT committee, agency FROM budget LIMIT 3", &allowed) {
            Verdict::Rejected(r) => {
                assert_eq!(r.rule, SanitizeRule::TableScope);
                assert!(r.reason.contains("budget"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(sanitizer()
            .sanitize_within("SELECT vendor_recipient FROM VENDOR_PAYMENTS LIMIT 3", &allowed)
            .is_accepted());
        assert!(sanitizer()
            .sanitize_within("SELECT committee FROM budget LIMIT 3", &[])
            .is_accepted());
        // Unknown tables still fail on their own rule.
        match sanitizer().sanitize_within("SELECT * FROM secrets", &allowed) {
            Verdict::Rejected(r) => assert_eq!(r.rule, SanitizeRule::UnknownTable),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cte_names_are_allowed() {
        let sql = "WITH totals(agency, amount) AS (SELECT agency, SUM(1) FROM budget GROUP BY agency) \
                   SELECT * FROM totals LIMIT 5";
        match sanitizer().sanitize(sql) {
            Verdict::Accepted(a) => assert_eq!(a.tables, vec!["budget"]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            rejected_rule("WITH x AS (SELECT * FROM sqlite_master) SELECT * FROM x"),
            SanitizeRule::UnknownTable
        );
    }

    #[test]
    fn test_length_bound() {
        let small = SqlSanitizer::new(Arc::new(SchemaDescriptor::state_finance()), 30);
        match small.sanitize("SELECT vendor_recipient FROM vendor_payments LIMIT 1") {
            Verdict::Rejected(r) => assert_eq!(r.rule, SanitizeRule::Length),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_full_scan_advisory() {
        match sanitizer().sanitize("SELECT * FROM vendor_payments") {
            Verdict::Accepted(a) => assert!(a.warnings.iter().any(|w| w.contains("WHERE or LIMIT"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_custom_schema() {
        let table = TableDef {
            name: "vendor_payments".to_string(),
            description: String::new(),
            keywords: vec![],
            columns: vec![
                ColumnDef::new("vendor_name", SemanticType::Text, ""),
                ColumnDef::new("amount", SemanticType::Real, ""),
            ],
            primary_measure: None,
            source_columns: vec![],
        };
        let schema = Arc::new(SchemaDescriptor::new(vec![table], None).unwrap());
        let sanitizer = SqlSanitizer::new(schema, 4_000);
        let sql = "SELECT vendor_name, SUM(amount) FROM vendor_payments GROUP BY vendor_name ORDER BY SUM(amount) DESC LIMIT 10";
        assert!(sanitizer.sanitize(sql).is_accepted());
        assert!(!sanitizer.sanitize("SELECT * FROM budget").is_accepted());
    }
}
