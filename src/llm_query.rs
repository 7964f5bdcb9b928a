//! llm_query.rs: Text-to-SQL synthesis for invoice questions.
//!
//! Sends the question plus the schema contract to the language model and
//! returns one SQL string. The only check applied to the reply is that it
//! contains a SELECT token; the database is the authority on whether the
//! tables and columns actually exist.

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, PipelineResult};
use crate::llm::LanguageModel;
use crate::query_schema::{self, INVOICE_SCHEMA};

lazy_static::lazy_static! {
    static ref SELECT_TOKEN: Regex = Regex::new(r"(?i)\bselect\b").expect("valid SELECT regex");
    static ref SQL_LABEL: Regex = Regex::new(r"(?i)^\s*sql\s*:\s*").expect("valid label regex");
}

/// Call the LLM to generate SQL from a natural language question.
pub async fn synthesize_sql(model: &dyn LanguageModel, question: &str) -> PipelineResult<String> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AnalysisError::EmptyQuestion);
    }

    let system_prompt = query_schema::build_text_to_sql_prompt(INVOICE_SCHEMA);
    let reply = model
        .generate(&system_prompt, question, None)
        .await
        .map_err(|e| {
            warn!(target: "pipeline", error = %e, "SQL synthesis call failed");
            AnalysisError::SynthesisFailed(e.to_string())
        })?;

    let sql = clean_sql_reply(&reply);
    debug!(target: "pipeline", sql = %sql, "Model SQL reply cleaned");

    if !is_plausible_query(&sql) {
        let preview: String = reply.chars().take(80).collect();
        return Err(AnalysisError::SynthesisFailed(format!(
            "model reply is not a SELECT query: {}",
            preview
        )));
    }

    info!(target: "pipeline", sql_len = sql.len(), "SQL synthesized");
    Ok(sql)
}

/// Strip markdown fences and a leading `SQL:` label from a model reply.
pub fn clean_sql_reply(reply: &str) -> String {
    let trimmed = reply.trim();
    let inner = if let Some(s) = trimmed.strip_prefix("```sql") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```SQL") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```") {
        s
    } else {
        trimmed
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner).trim();
    SQL_LABEL.replace(inner, "").trim().to_string()
}

/// Cheap plausibility check: a case-insensitive whole-word SELECT.
pub fn is_plausible_query(sql: &str) -> bool {
    SELECT_TOKEN.is_match(sql)
}
