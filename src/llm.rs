//! llm.rs: Language-model capability used by every pipeline stage.
//!
//! The pipeline only sees `LanguageModel::generate`. `OpenRouterModel` is the
//! production implementation and talks to any OpenAI-compatible
//! `/chat/completions` endpoint (OpenRouter by default, local servers too).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::settings::LlmSettings;

// ── Types ────────────────────────────────────────────

/// Strict JSON output contract requested from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key not set")]
    MissingApiKey,
    #[error("LLM request failed: {0}")]
    Http(String),
    #[error("LLM HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM JSON parse error: {0}")]
    Decode(String),
    #[error("LLM returned an empty reply")]
    EmptyReply,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One chat completion. `schema` asks the model for strict JSON output;
    /// callers still validate whatever comes back.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: Option<&OutputSchema>,
    ) -> Result<String, LlmError>;
}

// ── Wire types (OpenAI-compatible) ───────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

fn response_format(schema: &OutputSchema) -> Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": schema.name,
            "strict": true,
            "schema": schema.schema,
        }
    })
}

// ── Client ───────────────────────────────────────────

pub struct OpenRouterModel {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterModel {
    pub fn from_settings(cfg: &LlmSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let endpoint = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        info!(target: "pipeline", model = %cfg.model, endpoint = %endpoint, "LLM client configured");

        Ok(Self {
            http,
            endpoint,
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
    }

    fn is_openrouter(&self) -> bool {
        self.endpoint.contains("openrouter.ai")
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: Option<&OutputSchema>,
    ) -> Result<String, LlmError> {
        // Local OpenAI-compatible servers usually run without a key.
        if self.api_key.is_none() && self.is_openrouter() {
            return Err(LlmError::MissingApiKey);
        }

        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: system_prompt },
                Message { role: "user", content: user_prompt },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: schema.map(response_format),
        };

        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://invoice-insight.local")
            .header("X-Title", "invoice-insight");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let resp = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(300).collect();
            return Err(LlmError::Status { status, body: truncated });
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let text = extract_content(&data).ok_or(LlmError::EmptyReply)?;
        debug!(target: "pipeline", text_len = text.len(), "LLM reply received");
        Ok(text)
    }
}

/// Pull `choices[0].message.content` out of a chat completion.
fn extract_content(data: &Value) -> Option<String> {
    data["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
