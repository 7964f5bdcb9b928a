/// Settings management: defaults, optional TOML file, and environment overrides.

use crate::logging::{backend_info, backend_warn};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "INVOICE_INSIGHT";
const DEFAULT_CONFIG_FILE: &str = "invoice-insight";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Rows read per query before the rest are ignored.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL (OpenRouter, Ollama, llama.cpp, LM Studio).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Prefer env OPENROUTER_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    /// Rows serialized into classifier and chart prompts.
    #[serde(default = "default_prompt_row_limit")]
    pub prompt_row_limit: usize,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_db_path() -> String { "invoices.db".to_string() }
fn default_pool_size() -> u32 { 4 }
fn default_busy_timeout_ms() -> u64 { 5_000 }
fn default_max_rows() -> usize { 500 }
fn default_llm_base_url() -> String { "https://openrouter.ai/api/v1".to_string() }
fn default_llm_model() -> String {
    env::var("LLM_MODEL").unwrap_or_else(|_| "google/gemini-2.0-flash-exp:free".to_string())
}
fn default_max_tokens() -> u32 { 800 }
fn default_llm_timeout_secs() -> u64 { 60 }
fn default_prompt_row_limit() -> usize { 100 }

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_rows: default_max_rows(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prompt_row_limit: default_prompt_row_limit(),
            request_timeout_secs: None,
        }
    }
}

/// Load settings from `invoice-insight.toml` (or `config_path`) and
/// `INVOICE_INSIGHT__SECTION__KEY` environment variables.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings, config::ConfigError> {
    let file_source = match config_path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let cfg = config::Config::builder()
        .add_source(file_source)
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    let mut settings: Settings = cfg.try_deserialize()?;

    // Convenience: OPENROUTER_API_KEY env var (without the prefix)
    if settings.llm.api_key.as_deref().map_or(true, str::is_empty) {
        if let Ok(key) = env::var("OPENROUTER_API_KEY") {
            settings.llm.api_key = Some(key);
        }
    }

    if settings.llm.api_key.is_none() {
        backend_warn("No LLM API key configured; only keyless local endpoints will work");
    }
    backend_info(format!(
        "Settings loaded (db='{}', model='{}', base_url='{}')",
        settings.database.path, settings.llm.model, settings.llm.base_url
    ));

    Ok(settings)
}

/// Relative database paths live under the local data directory.
pub fn resolve_db_path(db_path: &str) -> PathBuf {
    let path = Path::new(db_path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if let Some(data_dir) = dirs::data_local_dir() {
        let full = data_dir.join("invoice-insight").join(db_path);
        if let Some(parent) = full.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                backend_warn(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    err
                ));
            }
        }
        return full;
    }
    path.to_path_buf()
}
