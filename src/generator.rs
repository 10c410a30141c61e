//! SQL generation
//!
//! Two tiers: a parameterized template when the question has a known shape,
//! otherwise a language-model draft prompted with the chosen table's columns.
//! Both come back as a `GeneratedSql` so the sanitizer treats them the same.

use crate::error::{FailureKind, PlannerError};
use crate::llm::{clean_sql_response, CompletionConstraints, LanguageModel};
use crate::schema::{SchemaDescriptor, SemanticType, TableDef};
use crate::templates::{match_template, TemplateShape};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlOrigin {
    Templated,
    ModelGenerated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum GeneratedSql {
    Templated { sql: String, shape: TemplateShape },
    ModelGenerated { sql: String },
    Failed { reason: String, kind: FailureKind },
}

impl GeneratedSql {
    pub fn sql(&self) -> Option<&str> {
        match self {
            GeneratedSql::Templated { sql, .. } | GeneratedSql::ModelGenerated { sql } => Some(sql),
            GeneratedSql::Failed { .. } => None,
        }
    }

    /// Failure carrying the error's own kind
    pub fn failed(error: PlannerError) -> Self {
        GeneratedSql::Failed {
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    pub fn origin(&self) -> Option<SqlOrigin> {
        match self {
            GeneratedSql::Templated { .. } => Some(SqlOrigin::Templated),
            GeneratedSql::ModelGenerated { .. } => Some(SqlOrigin::ModelGenerated),
            GeneratedSql::Failed { .. } => None,
        }
    }
}

/// Inputs for one generation attempt
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub table: &'a str,
    pub schema: &'a SchemaDescriptor,
    pub row_limit: usize,
    /// Skip templates (used when retrying after a rejection)
    pub model_only: bool,
    /// Rejection reason of the previous attempt, fed back to the model
    pub feedback: Option<&'a str>,
}

pub struct SqlGenerator<'m> {
    model: &'m dyn LanguageModel,
    timeout: Duration,
    use_templates: bool,
}

impl<'m> SqlGenerator<'m> {
    pub fn new(model: &'m dyn LanguageModel, timeout: Duration, use_templates: bool) -> Self {
        Self {
            model,
            timeout,
            use_templates,
        }
    }

    pub async fn generate_sql(&self, request: &GenerationRequest<'_>) -> GeneratedSql {
        let table = match request.schema.table(request.table) {
            Some(t) => t,
            None => return GeneratedSql::failed(PlannerError::UnknownTable(request.table.to_string())),
        };

        if self.use_templates && !request.model_only {
            if let Some(m) = match_template(request.question, table, request.row_limit) {
                info!("Template {:?} matched for table {}", m.shape, table.name);
                return GeneratedSql::Templated {
                    sql: m.sql,
                    shape: m.shape,
                };
            }
        }

        let prompt = build_prompt(request.question, table, request.feedback);
        let constraints = CompletionConstraints {
            allowed_tables: vec![table.name.clone()],
            ..CompletionConstraints::default()
        };

        debug!("Asking {} for SQL ({} prompt chars)", self.model.name(), prompt.len());
        let response = match tokio::time::timeout(self.timeout, self.model.complete(&prompt, &constraints)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("Language model failed: {}", e);
                return GeneratedSql::Failed {
                    reason: e.to_string(),
                    kind: FailureKind::UpstreamError,
                };
            }
            Err(_) => {
                warn!("Language model timed out after {:?}", self.timeout);
                return GeneratedSql::failed(PlannerError::Upstream(format!(
                    "language model timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let sql = clean_sql_response(&response);
        if sql.is_empty() {
            return GeneratedSql::failed(PlannerError::Upstream("language model returned no SQL".to_string()));
        }
        GeneratedSql::ModelGenerated { sql }
    }
}

/// Prompt carrying the table's columns, the currency rules and a few examples
pub fn build_prompt(question: &str, table: &TableDef, feedback: Option<&str>) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| {
            let mut line = format!("- {} ({})", c.name, c.semantic_type.prompt_label());
            if !c.description.is_empty() {
                line.push_str(&format!(": {}", c.description));
            }
            if c.semantic_type == SemanticType::Currency {
                line.push_str(&format!(
                    ". CRITICAL: always use {} for math",
                    c.numeric_expr()
                ));
            }
            line
        })
        .join("\n");

    let examples = examples_for(table);

    let feedback_block = match feedback {
        Some(reason) => format!(
            "\nYOUR PREVIOUS ANSWER WAS REJECTED: {}\nFix the problem and answer again.\n",
            reason
        ),
        None => String::new(),
    };

    format!(
        r#"You are a SQL expert for North Carolina government finance data (SQLite).

TABLE {table}: {description}
COLUMNS:
{columns}

RULES:
1. Query ONLY the table {table}; use ONLY the columns listed above.
2. Generate exactly one SELECT statement (no INSERT, UPDATE, DELETE, DROP, ALTER, PRAGMA, ATTACH).
3. Use LIKE '%keyword%' with a short keyword for names.
4. "How many" means COUNT, "total" or "sum" means SUM, "largest" means MAX, "smallest" means MIN.
5. Respect requested limits: "top 5" means LIMIT 5.
6. ONLY add WHERE clauses for filters the user EXPLICITLY mentions; never filter by state or region.
7. When in doubt, use fewer filters rather than more.

EXAMPLES:
{examples}
{feedback}
USER QUESTION: "{question}"

Generate ONLY the SQL query (no explanations, no markdown):"#,
        table = table.name,
        description = table.description,
        columns = columns,
        examples = examples,
        feedback = feedback_block,
        question = question,
    )
}

fn examples_for(table: &TableDef) -> String {
    let mut lines = vec![format!("Q: How many rows are there?\nSQL: SELECT COUNT(*) FROM {}", table.name)];

    let group = table
        .columns
        .iter()
        .find(|c| c.semantic_type == SemanticType::Text);
    if let (Some(group), Some(measure)) = (group, table.measure()) {
        lines.push(format!(
            "Q: Top 5 {g} by {m}\nSQL: SELECT {g}, SUM({expr}) AS total FROM {t} GROUP BY {g} ORDER BY total DESC LIMIT 5",
            g = group.name,
            m = measure.name,
            expr = measure.numeric_expr(),
            t = table.name,
        ));
    }
    if let Some(year) = table.year_column() {
        lines.push(format!(
            "Q: How many rows in 2025?\nSQL: SELECT COUNT(*) FROM {} WHERE {} = '2025'",
            table.name, year.name
        ));
    }

    lines.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
        allowed: Mutex<Vec<String>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
                allowed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, prompt: &str, constraints: &CompletionConstraints) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            *self.allowed.lock().unwrap() = constraints.allowed_tables.clone();
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(PlannerError::Upstream(e.to_string())),
            }
        }
    }

    fn request<'a>(question: &'a str, schema: &'a SchemaDescriptor) -> GenerationRequest<'a> {
        GenerationRequest {
            question,
            table: "vendor_payments",
            schema,
            row_limit: 1000,
            model_only: false,
            feedback: None,
        }
    }

    #[tokio::test]
    async fn test_template_preferred_over_model() {
        let schema = SchemaDescriptor::state_finance();
        let model = Canned::ok("SELECT 1");
        let generator = SqlGenerator::new(&model, Duration::from_secs(1), true);
        let generated = generator
            .generate_sql(&request("What are the top 5 agencies by spending?", &schema))
            .await;
        assert_eq!(generated.origin(), Some(SqlOrigin::Templated));
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_model_output_is_cleaned() {
        let schema = SchemaDescriptor::state_finance();
        let model = Canned::ok("```sql\nSELECT * FROM vendor_payments WHERE vendor_recipient LIKE '%Duke%'\n```");
        let generator = SqlGenerator::new(&model, Duration::from_secs(1), true);
        let generated = generator
            .generate_sql(&request("Total payments to Duke Energy", &schema))
            .await;
        assert_eq!(
            generated,
            GeneratedSql::ModelGenerated {
                sql: "SELECT * FROM vendor_payments WHERE vendor_recipient LIKE '%Duke%'".to_string()
            }
        );
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Total payments to Duke Energy"));
        assert!(prompts[0].contains("- vendor_recipient (TEXT)"));
        assert!(!prompts[0].contains("net_appropriations"));
        assert_eq!(*model.allowed.lock().unwrap(), vec!["vendor_payments".to_string()]);
    }

    #[tokio::test]
    async fn test_feedback_reaches_prompt() {
        let schema = SchemaDescriptor::state_finance();
        let model = Canned::ok("SELECT 1 FROM vendor_payments");
        let generator = SqlGenerator::new(&model, Duration::from_secs(1), true);
        let mut req = request("top 5 vendors", &schema);
        req.model_only = true;
        req.feedback = Some("references unknown table(s): payments");
        let generated = generator.generate_sql(&req).await;
        assert_eq!(generated.origin(), Some(SqlOrigin::ModelGenerated));
        assert!(model.prompts.lock().unwrap()[0].contains("WAS REJECTED: references unknown table(s): payments"));
    }

    #[tokio::test]
    async fn test_slow_model_times_out() {
        let schema = SchemaDescriptor::state_finance();
        let model = Canned {
            delay: Duration::from_millis(200),
            ..Canned::ok("SELECT 1")
        };
        let generator = SqlGenerator::new(&model, Duration::from_millis(20), false);
        let generated = generator.generate_sql(&request("anything at all", &schema)).await;
        match generated {
            GeneratedSql::Failed { reason, kind } => {
                assert!(reason.contains("timed out"));
                assert_eq!(kind, FailureKind::UpstreamError);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_model_answer_fails() {
        let schema = SchemaDescriptor::state_finance();
        let model = Canned::ok("```\n```");
        let generator = SqlGenerator::new(&model, Duration::from_secs(1), false);
        let generated = generator.generate_sql(&request("anything", &schema)).await;
        assert!(matches!(generated, GeneratedSql::Failed { .. }));
        assert_eq!(generated.sql(), None);
    }

    #[tokio::test]
    async fn test_unknown_table_fails_as_unknown_table() {
        let schema = SchemaDescriptor::state_finance();
        let model = Canned::ok("SELECT 1");
        let generator = SqlGenerator::new(&model, Duration::from_secs(1), true);
        let mut req = request("top 5 vendors", &schema);
        req.table = "payroll";
        match generator.generate_sql(&req).await {
            GeneratedSql::Failed { reason, kind } => {
                assert_eq!(kind, FailureKind::UnknownTable);
                assert!(reason.contains("payroll"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
