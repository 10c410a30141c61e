//! Planner configuration
//!
//! Limits and model settings, read from the environment (after `.env` is
//! loaded) or from a JSON file.

use crate::error::{PlannerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Limits and behaviour of the query planner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum accepted SQL length in characters
    pub max_sql_length: usize,

    /// Maximum rows returned by a single statement
    pub row_limit: usize,

    /// Statement timeout in milliseconds
    pub statement_timeout_ms: u64,

    /// Language-model call timeout in milliseconds
    pub llm_timeout_ms: u64,

    /// Attempts at generating acceptable SQL (1 = no retry)
    pub max_generation_attempts: usize,

    /// Try parameterized templates before asking the model
    pub use_templates: bool,

    /// Main SQLite database file
    pub database_path: PathBuf,

    /// Extra SQLite files attached read-only to every connection
    pub attached_databases: Vec<PathBuf>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_sql_length: 4_000,
            row_limit: 1_000,
            statement_timeout_ms: 10_000,
            llm_timeout_ms: 30_000,
            max_generation_attempts: 2,
            use_templates: true,
            database_path: PathBuf::from("db/budget.db"),
            attached_databases: Vec::new(),
        }
    }
}

impl PlannerConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PlannerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `PLANNER_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("PLANNER_MAX_SQL_LENGTH")? {
            config.max_sql_length = v;
        }
        if let Some(v) = env_parse::<usize>("PLANNER_ROW_LIMIT")? {
            config.row_limit = v;
        }
        if let Some(v) = env_parse::<u64>("PLANNER_STATEMENT_TIMEOUT_MS")? {
            config.statement_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("PLANNER_LLM_TIMEOUT_MS")? {
            config.llm_timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("PLANNER_GENERATION_ATTEMPTS")? {
            config.max_generation_attempts = v;
        }
        if let Some(v) = env_parse::<bool>("PLANNER_USE_TEMPLATES")? {
            config.use_templates = v;
        }
        if let Ok(path) = std::env::var("PLANNER_DATABASE") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(paths) = std::env::var("PLANNER_ATTACH") {
            config.attached_databases = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sql_length == 0 {
            return Err(PlannerError::Config("max_sql_length must be positive".to_string()));
        }
        if self.row_limit == 0 {
            return Err(PlannerError::Config("row_limit must be positive".to_string()));
        }
        if self.max_generation_attempts == 0 {
            return Err(PlannerError::Config(
                "max_generation_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }
}

/// Settings for the OpenAI-compatible chat completions client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.1,
            max_tokens: 512,
            request_timeout_ms: 30_000,
        }
    }
}

impl LlmSettings {
    /// Reads `GROQ_API_KEY`, `OPENAI_API_KEY` or `LLM_API_KEY` (first found),
    /// `LLM_BASE_URL` and `MODEL_NAME`
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        let api_key = ["GROQ_API_KEY", "OPENAI_API_KEY", "LLM_API_KEY"]
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
        match api_key {
            Some(key) => settings.api_key = key,
            None => {
                return Err(PlannerError::Config(
                    "no API key found (set GROQ_API_KEY, OPENAI_API_KEY or LLM_API_KEY)"
                        .to_string(),
                ))
            }
        }

        if std::env::var("GROQ_API_KEY").is_err() && std::env::var("OPENAI_API_KEY").is_ok() {
            settings.base_url = "https://api.openai.com/v1".to_string();
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("MODEL_NAME") {
            settings.model = model;
        }
        if let Some(v) = env_parse::<f32>("LLM_TEMPERATURE")? {
            settings.temperature = v;
        }

        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PlannerError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_generation_attempts, 2);
        assert_eq!(config.statement_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_row_limit_rejected() {
        let config = PlannerConfig {
            row_limit: 0,
            ..PlannerConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlannerError::Config(_))));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"row_limit": 50, "database_path": "data/vendor.db"}"#).unwrap();
        assert_eq!(config.row_limit, 50);
        assert_eq!(config.max_sql_length, 4_000);
        assert_eq!(config.database_path, PathBuf::from("data/vendor.db"));
    }
}
