use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a database-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    Cancelled,
    Syntax,
    MissingTable,
    MissingColumn,
    Other,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionErrorKind::Timeout => write!(f, "timeout"),
            ExecutionErrorKind::Cancelled => write!(f, "cancelled"),
            ExecutionErrorKind::Syntax => write!(f, "syntax"),
            ExecutionErrorKind::MissingTable => write!(f, "missing table"),
            ExecutionErrorKind::MissingColumn => write!(f, "missing column"),
            ExecutionErrorKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unsafe SQL: {0}")]
    UnsafeSql(String),

    #[error("Execution error ({kind}): {message}")]
    Execution {
        kind: ExecutionErrorKind,
        message: String,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Tag carried by a failed plan so callers can branch without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTable,
    UnsafeSql,
    ExecutionError,
    UpstreamError,
    Internal,
}

impl PlannerError {
    pub fn execution(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        PlannerError::Execution {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            PlannerError::UnknownTable(_) => FailureKind::UnknownTable,
            PlannerError::UnsafeSql(_) => FailureKind::UnsafeSql,
            PlannerError::Execution { .. } | PlannerError::Database(_) => {
                FailureKind::ExecutionError
            }
            PlannerError::Upstream(_) => FailureKind::UpstreamError,
            PlannerError::Schema(_)
            | PlannerError::Config(_)
            | PlannerError::Io(_)
            | PlannerError::Json(_)
            | PlannerError::Csv(_) => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
