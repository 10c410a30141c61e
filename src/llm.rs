use crate::config::LlmSettings;
use crate::error::{PlannerError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Generation constraints passed along with a prompt. Unset sampling values
/// fall back to the client's own settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionConstraints {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Tables the answer may reference; named in the system message
    #[serde(default)]
    pub allowed_tables: Vec<String>,
}

/// System message for a SQL completion
pub fn system_message(constraints: &CompletionConstraints) -> String {
    let mut message =
        "You are a precise SQL generator. Return only a single SQLite SELECT statement, no other text."
            .to_string();
    if !constraints.allowed_tables.is_empty() {
        message.push_str(&format!(
            " Read only from these tables: {}.",
            constraints.allowed_tables.join(", ")
        ));
    }
    message
}

/// Text-completion seam. Implementations may be slow, fail, or return
/// ill-formed SQL; callers enforce their own timeout.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, constraints: &CompletionConstraints) -> Result<String>;
}

/// OpenAI-compatible chat completions client (Groq, OpenAI)
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| PlannerError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, constraints: &CompletionConstraints) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_message(constraints)},
                {"role": "user", "content": prompt}
            ],
            "temperature": constraints.temperature.unwrap_or(self.temperature),
            "max_tokens": constraints.max_tokens.unwrap_or(self.max_tokens)
        });

        debug!("Calling {} at {}", self.model, self.base_url);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PlannerError::Upstream(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            return Err(PlannerError::Upstream(format!(
                "LLM API returned {}: {}",
                status, snippet
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PlannerError::Upstream(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PlannerError::Upstream("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Strip markdown code fences, a leading `sql` tag and stray backticks
pub fn clean_sql_response(response: &str) -> String {
    let mut sql = response.trim().to_string();

    if sql.starts_with("```") {
        let lines: Vec<&str> = sql.lines().collect();
        if lines.len() > 2 {
            sql = lines[1..lines.len() - 1].join("\n");
        }
        let trimmed = sql.trim_start();
        if let Some(rest) = trimmed.strip_prefix("sql").or_else(|| trimmed.strip_prefix("SQL")) {
            if rest.starts_with(char::is_whitespace) {
                sql = rest.trim().to_string();
            }
        }
    }

    sql.replace("```", "").trim().to_string()
}
