//! Query Planner
//!
//! Orchestrates one natural-language question end to end:
//! select table → generate SQL → sanitize (with one feedback retry) →
//! execute read-only → review rows. `plan_and_run` never returns a raw error.

use crate::config::PlannerConfig;
use crate::error::{ExecutionErrorKind, FailureKind, PlannerError, Result};
use crate::executor::{ExecutionLimits, QueryExecutor};
use crate::generator::{GeneratedSql, GenerationRequest, SqlGenerator};
use crate::llm::LanguageModel;
use crate::result::{empty_result_note, review_rows, QueryResult};
use crate::sanitizer::{Rejection, SqlSanitizer, Verdict};
use crate::schema::SchemaDescriptor;
use crate::selector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const USER_FAILURE_MESSAGE: &str = "Sorry, I could not answer that question.";

const YEAR_PROBE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStage {
    Received,
    TableSelected,
    SqlGenerated,
    Accepted,
    Rejected,
    Executed,
    Failed,
}

/// A question on its way through the planner
#[derive(Debug, Clone, Serialize)]
pub struct PlannedQuery {
    request_id: String,
    question: String,
    table: Option<String>,
    generated: Option<GeneratedSql>,
    verdict: Option<Verdict>,
    stage: PlanStage,
    attempts: usize,
    failure: Option<(FailureKind, String)>,
    created_at: DateTime<Utc>,
}

impl PlannedQuery {
    fn received(question: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            table: None,
            generated: None,
            verdict: None,
            stage: PlanStage::Received,
            attempts: 0,
            failure: None,
            created_at: Utc::now(),
        }
    }

    fn fail(&mut self, kind: FailureKind, reason: String) {
        self.stage = PlanStage::Failed;
        self.failure = Some((kind, reason));
    }

    fn reject(&mut self, generated: GeneratedSql, rejection: Rejection) {
        self.generated = Some(generated);
        self.verdict = Some(Verdict::Rejected(rejection));
        self.stage = PlanStage::Rejected;
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn generated(&self) -> Option<&GeneratedSql> {
        self.generated.as_ref()
    }

    pub fn sql_text(&self) -> Option<&str> {
        self.generated.as_ref().and_then(|g| g.sql())
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn stage(&self) -> PlanStage {
        self.stage
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_accepted(&self) -> bool {
        self.stage == PlanStage::Accepted
    }

    /// Failure tag and technical reason for a plan that did not get accepted
    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match (&self.failure, &self.verdict) {
            (Some((kind, reason)), _) => Some((*kind, reason.as_str())),
            (None, Some(Verdict::Rejected(r))) => Some((FailureKind::UnsafeSql, r.reason.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFailure {
    pub kind: FailureKind,
    /// Technical reason, for logs and debugging
    pub reason: String,
    /// Generic message safe to show to end users
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<ExecutionErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_text: Option<String>,
}

impl PlanFailure {
    fn new(kind: FailureKind, reason: impl Into<String>, planned: &PlannedQuery) -> Self {
        Self {
            kind,
            reason: reason.into(),
            user_message: USER_FAILURE_MESSAGE.to_string(),
            execution_error: None,
            table: planned.table.clone(),
            sql_text: planned.sql_text().map(str::to_string),
        }
    }

    fn from_error(error: &PlannerError, planned: &PlannedQuery) -> Self {
        let mut failure = Self::new(error.kind(), error.to_string(), planned);
        if let PlannerError::Execution { kind, .. } = error {
            failure.execution_error = Some(*kind);
        }
        failure
    }
}

/// Outcome of `plan_and_run`: rows or a structured failure
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PlanResponse {
    Answered(QueryResult),
    Failed { error: PlanFailure },
}

impl PlanResponse {
    pub fn is_answered(&self) -> bool {
        matches!(self, PlanResponse::Answered(_))
    }

    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            PlanResponse::Answered(r) => Some(r),
            PlanResponse::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&PlanFailure> {
        match self {
            PlanResponse::Failed { error } => Some(error),
            PlanResponse::Answered(_) => None,
        }
    }
}

pub struct QueryPlanner {
    schema: Arc<SchemaDescriptor>,
    model: Arc<dyn LanguageModel>,
    executor: Arc<dyn QueryExecutor>,
    sanitizer: SqlSanitizer,
    config: PlannerConfig,
}

impl QueryPlanner {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        model: Arc<dyn LanguageModel>,
        executor: Arc<dyn QueryExecutor>,
        config: PlannerConfig,
    ) -> Self {
        let sanitizer = SqlSanitizer::new(schema.clone(), config.max_sql_length);
        Self {
            schema,
            model,
            executor,
            sanitizer,
            config,
        }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn select_table(&self, question: &str) -> Result<String> {
        selector::select_table(question, &self.schema)
    }

    pub fn sanitize(&self, sql: &str) -> Verdict {
        self.sanitizer.sanitize(sql)
    }

    fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            row_limit: self.config.row_limit,
            timeout: self.config.statement_timeout(),
        }
    }

    /// Take a question as far as an accepted or rejected statement
    pub async fn plan(&self, question: &str) -> PlannedQuery {
        let mut planned = PlannedQuery::received(question);
        info!("🔍 [{}] Planning: {}", planned.request_id, question);

        let table = match self.select_table(question) {
            Ok(t) => t,
            Err(e) => {
                warn!("[{}] Table selection failed: {}", planned.request_id, e);
                planned.fail(e.kind(), e.to_string());
                return planned;
            }
        };
        info!("[{}] Selected table {}", planned.request_id, table);
        planned.table = Some(table.clone());
        planned.stage = PlanStage::TableSelected;

        let generator = SqlGenerator::new(
            self.model.as_ref(),
            self.config.llm_timeout(),
            self.config.use_templates,
        );
        let mut last_rejection: Option<(GeneratedSql, Rejection)> = None;

        for attempt in 1..=self.config.max_generation_attempts.max(1) {
            planned.attempts = attempt;
            let feedback = last_rejection.as_ref().map(|(_, r)| r.reason.clone());
            let request = GenerationRequest {
                question,
                table: &table,
                schema: &self.schema,
                row_limit: self.config.row_limit,
                model_only: attempt > 1,
                feedback: feedback.as_deref(),
            };

            let generated = generator.generate_sql(&request).await;
            let sql = match &generated {
                GeneratedSql::Failed { reason, kind } => {
                    warn!("[{}] Generation failed: {}", planned.request_id, reason);
                    match last_rejection.take() {
                        Some((previous, rejection)) => planned.reject(previous, rejection),
                        None => {
                            let (kind, reason) = (*kind, reason.clone());
                            planned.generated = Some(generated);
                            planned.fail(kind, reason);
                        }
                    }
                    return planned;
                }
                other => other.sql().unwrap_or_default().to_string(),
            };
            planned.stage = PlanStage::SqlGenerated;
            debug!("[{}] Attempt {} SQL: {}", planned.request_id, attempt, sql);

            match self.sanitizer.sanitize_within(&sql, std::slice::from_ref(&table)) {
                Verdict::Accepted(accepted) => {
                    info!("✅ [{}] SQL accepted on attempt {}", planned.request_id, attempt);
                    planned.generated = Some(generated);
                    planned.verdict = Some(Verdict::Accepted(accepted));
                    planned.stage = PlanStage::Accepted;
                    return planned;
                }
                Verdict::Rejected(rejection) => {
                    warn!(
                        "[{}] SQL rejected on attempt {}: {}",
                        planned.request_id, attempt, rejection.reason
                    );
                    last_rejection = Some((generated, rejection));
                }
            }
        }

        if let Some((generated, rejection)) = last_rejection {
            planned.reject(generated, rejection);
        }
        planned
    }

    /// Run an accepted plan against the database
    pub async fn execute(&self, planned: &PlannedQuery) -> Result<QueryResult> {
        let (sql, accepted) = match (planned.sql_text(), &planned.verdict) {
            (Some(sql), Some(Verdict::Accepted(accepted))) if planned.is_accepted() => (sql, accepted),
            _ => {
                return Err(PlannerError::UnsafeSql(format!(
                    "plan {} was not accepted",
                    planned.request_id
                )))
            }
        };
        let table_name = accepted
            .tables
            .first()
            .or(planned.table.as_ref())
            .map(String::as_str)
            .unwrap_or_default();
        let origin = match planned.generated.as_ref().and_then(|g| g.origin()) {
            Some(origin) => origin,
            None => return Err(PlannerError::UnsafeSql("plan carries no SQL".to_string())),
        };

        let rows = self.executor.execute(sql, &self.limits()).await?;

        let money_columns: Vec<&str> = self
            .schema
            .table(table_name)
            .map(|t| {
                t.columns
                    .iter()
                    .filter(|c| c.semantic_type.is_measure())
                    .map(|c| c.name.as_str())
                    .collect()
            })
            .unwrap_or_default();
        let review = review_rows(&rows, &money_columns, self.config.row_limit);

        let mut result = QueryResult::new(
            &planned.request_id,
            table_name,
            sql,
            origin,
            rows,
            self.executor.name(),
            accepted.warnings.clone(),
        );
        for warning in review {
            result.push_warning(warning);
        }

        if result.row_count() == 0 {
            let note = self.explain_empty_result(table_name, sql).await;
            info!("[{}] Empty result: {}", planned.request_id, note);
            result.set_note(note);
        }

        Ok(result)
    }

    /// Explain why a statement returned no rows, probing the years present
    /// when the statement filtered on the year column
    pub async fn explain_empty_result(&self, table: &str, sql: &str) -> String {
        let year_column = self.schema.table(table).and_then(|t| t.year_column());
        let mut years = Vec::new();

        if let Some(column) = year_column {
            if sql.to_lowercase().contains(&column.name.to_lowercase()) {
                let probe = format!(
                    "SELECT DISTINCT {c} FROM {t} ORDER BY {c} LIMIT {n}",
                    c = column.name,
                    t = table,
                    n = YEAR_PROBE_LIMIT
                );
                if self.sanitizer.sanitize(&probe).is_accepted() {
                    match self.executor.execute(&probe, &self.limits()).await {
                        Ok(rows) => {
                            years = rows
                                .column_values(&column.name)
                                .filter_map(|v| match v {
                                    Value::String(s) => Some(s.clone()),
                                    Value::Number(n) => Some(n.to_string()),
                                    _ => None,
                                })
                                .collect();
                        }
                        Err(e) => debug!("Year probe failed: {}", e),
                    }
                }
            }
        }

        empty_result_note(sql, year_column.map(|c| c.name.as_str()), &years)
    }

    /// Plan and execute a question; failures come back as `PlanResponse::Failed`
    pub async fn plan_and_run(&self, question: &str) -> PlanResponse {
        let planned = self.plan(question).await;

        match planned.stage {
            PlanStage::Accepted => match self.execute(&planned).await {
                Ok(result) => {
                    info!(
                        "📊 [{}] Answered from {} with {} rows",
                        planned.request_id,
                        result.table(),
                        result.row_count()
                    );
                    PlanResponse::Answered(result)
                }
                Err(e) => {
                    error!("[{}] Execution failed: {}", planned.request_id, e);
                    PlanResponse::Failed {
                        error: PlanFailure::from_error(&e, &planned),
                    }
                }
            },
            _ => {
                let (kind, reason) = planned
                    .failure()
                    .map(|(k, r)| (k, r.to_string()))
                    .unwrap_or((FailureKind::Internal, "plan did not complete".to_string()));
                PlanResponse::Failed {
                    error: PlanFailure::new(kind, reason, &planned),
                }
            }
        }
    }
}
