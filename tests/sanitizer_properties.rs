//! Property-based tests for the SQL sanitizer and table selection.

use proptest::prelude::*;
use std::sync::Arc;

use budget_query_planner::sanitizer::{SanitizeRule, SqlSanitizer, Verdict, DENY_LIST};
use budget_query_planner::schema::SchemaDescriptor;
use budget_query_planner::selector::select_table;

fn sanitizer() -> SqlSanitizer {
    SqlSanitizer::new(Arc::new(SchemaDescriptor::state_finance()), 4_000)
}

/// Strategy for a deny-listed keyword in random letter case.
fn arb_denied_word() -> impl Strategy<Value = String> {
    (prop::sample::select(DENY_LIST.to_vec()), prop::collection::vec(any::<bool>(), 16)).prop_map(
        |(word, upper)| {
            word.chars()
                .zip(upper.iter().cycle())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
                .collect()
        },
    )
}

/// Strategy for what may separate tokens.
fn arb_separator() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![" ", "\n", "\t", " \r\n ", "/* note */", "/**/", "\n-- trailing\n"])
}

fn arb_table_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("vendor_payments".to_string()),
        Just("budget".to_string()),
        Just("BUDGET".to_string()),
        "[a-z_][a-z0-9_]{0,12}",
    ]
}

/// Predicates only SQLite's own grammar reads
fn arb_sqlite_only_predicate() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["x GLOB '*'", "x NOTNULL", "x ISNULL", "x = 1"])
}

/// Derived tables and aliases that may come before a later FROM item
fn arb_leading_item() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "(SELECT 1) t",
        "(SELECT 1) AS t",
        "(SELECT fiscal_year FROM budget) b",
        "vendor_payments v",
        "(VALUES (1))",
    ])
}

proptest! {
    #[test]
    fn denied_keyword_anywhere_is_rejected(
        word in arb_denied_word(),
        before in arb_separator(),
        after in arb_separator(),
    ) {
        let sql = format!(
            "SELECT * FROM vendor_payments WHERE fiscal_year = '2025'{}{}{}LIMIT 5",
            before, word, after
        );
        prop_assert!(!sanitizer().sanitize(&sql).is_accepted(), "accepted: {}", sql);
    }

    #[test]
    fn denied_keyword_in_comment_is_rejected(word in arb_denied_word()) {
        let sql = format!("SELECT * FROM budget /* {} */ LIMIT 5", word);
        match sanitizer().sanitize(&sql) {
            Verdict::Rejected(r) => prop_assert_eq!(r.rule, SanitizeRule::DenyList),
            Verdict::Accepted(_) => prop_assert!(false, "accepted: {}", sql),
        }
    }

    #[test]
    fn second_statement_is_rejected(
        first in arb_table_name(),
        second in arb_table_name(),
        sep in arb_separator(),
    ) {
        let sql = format!("SELECT * FROM {};{}SELECT * FROM {}", first, sep, second);
        prop_assert!(!sanitizer().sanitize(&sql).is_accepted());
    }

    #[test]
    fn accepted_tables_are_known(name in arb_table_name()) {
        let schema = SchemaDescriptor::state_finance();
        let sql = format!("SELECT * FROM {} WHERE fiscal_year = '2025' LIMIT 10", name);
        if let Verdict::Accepted(accepted) = sanitizer().sanitize(&sql) {
            prop_assert!(schema.is_known_table(&name), "accepted unknown table {}", name);
            for table in &accepted.tables {
                prop_assert!(schema.is_known_table(table));
            }
        }
    }

    #[test]
    fn later_from_items_are_checked(
        leading in arb_leading_item(),
        name in arb_table_name(),
        predicate in arb_sqlite_only_predicate(),
        join in prop::sample::select(vec![", ", " JOIN ", " CROSS JOIN "]),
    ) {
        let schema = SchemaDescriptor::state_finance();
        let sql = format!("SELECT * FROM {}{}{} WHERE {}", leading, join, name, predicate);
        if let Verdict::Accepted(accepted) = sanitizer().sanitize(&sql) {
            prop_assert!(schema.is_known_table(&name), "accepted unknown table in {}", sql);
            prop_assert!(accepted.tables.iter().any(|t| t.eq_ignore_ascii_case(&name)));
        }
    }

    #[test]
    fn sanitize_never_panics(sql in ".{0,200}") {
        let _ = sanitizer().sanitize(&sql);
    }

    #[test]
    fn select_table_is_deterministic_and_known(question in "[a-zA-Z0-9 ?,']{0,80}") {
        let schema = SchemaDescriptor::state_finance();
        let first = select_table(&question, &schema).unwrap();
        prop_assert!(schema.is_known_table(&first));
        prop_assert_eq!(select_table(&question, &schema).unwrap(), first);
    }
}
