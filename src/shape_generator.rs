//! shape_generator.rs: Chart-shaping retry loop.
//!
//! Runs up to `RETRY_BUDGET` attempts, one prompt strategy per attempt.
//! An attempt fails when the model errors, the reply is not a JSON
//! object, or the shape cannot be repaired into a valid chart. When every
//! attempt has failed the deterministic fallback chart is returned, so
//! this stage always yields a structurally valid `AnalysisResult`.

use serde_json::Value;
use tracing::{info, warn};

use crate::chart::{self, AnalysisResult, ChartData, ChartKind};
use crate::error::AnalysisError;
use crate::invoice_db::ResultSet;
use crate::llm::LanguageModel;
use crate::query_schema::INVOICE_SCHEMA;
use crate::shape_prompts::{self, PromptInput, PromptStrategy, PROMPT_STRATEGIES, RETRY_BUDGET};

/// Loop state, one step per model call.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeState {
    Attempt(usize),
    Success(AnalysisResult),
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub result: AnalysisResult,
    /// Model calls made, 1..=RETRY_BUDGET.
    pub attempts: usize,
    pub fell_back: bool,
}

pub struct ShapeGenerator<'a> {
    model: &'a dyn LanguageModel,
    strategies: &'a [PromptStrategy],
    prompt_row_limit: usize,
}

impl<'a> ShapeGenerator<'a> {
    pub fn new(model: &'a dyn LanguageModel, prompt_row_limit: usize) -> Self {
        Self { model, strategies: &PROMPT_STRATEGIES, prompt_row_limit }
    }

    pub async fn generate(&self, question: &str, kind: ChartKind, rows: &ResultSet) -> GenerationOutcome {
        let rows_json = rows.to_prompt_json(self.prompt_row_limit);
        let input = PromptInput { question, kind, rows_json: &rows_json, schema: INVOICE_SCHEMA };
        let budget = RETRY_BUDGET.min(self.strategies.len());

        let mut state = ShapeState::Attempt(0);
        let mut attempts = 0;
        loop {
            state = match state {
                ShapeState::Attempt(n) => {
                    attempts = n + 1;
                    match self.attempt(n, &input, rows).await {
                        Ok(result) => ShapeState::Success(result),
                        Err(e) => {
                            warn!(
                                target: "pipeline",
                                attempt = n,
                                strategy = self.strategies[n].name,
                                error = %e,
                                "Chart attempt rejected"
                            );
                            if n + 1 < budget {
                                ShapeState::Attempt(n + 1)
                            } else {
                                ShapeState::Exhausted
                            }
                        }
                    }
                }
                ShapeState::Success(result) => {
                    return GenerationOutcome { result, attempts, fell_back: false };
                }
                ShapeState::Exhausted => {
                    warn!(target: "pipeline", attempts, chart = %kind, rows = rows.len(), "Retry budget spent, returning fallback chart");
                    return GenerationOutcome {
                        result: fallback_result(kind, rows.len()),
                        attempts,
                        fell_back: true,
                    };
                }
            };
        }
    }

    async fn attempt(
        &self,
        n: usize,
        input: &PromptInput<'_>,
        rows: &ResultSet,
    ) -> Result<AnalysisResult, AnalysisError> {
        let strategy = &self.strategies[n];
        let prompt = (strategy.build)(input);
        let output_schema = shape_prompts::output_schema(input.kind);

        let reply = self
            .model
            .generate(&prompt.system, &prompt.user, Some(&output_schema))
            .await
            .map_err(|e| AnalysisError::ShapeValidationFailed(format!("model call failed: {}", e)))?;
        let (data, interpretation) = shape_reply(&reply, input.kind, strategy.point_limit)?;

        info!(
            target: "pipeline",
            attempt = n,
            strategy = strategy.name,
            chart = %input.kind,
            points = data.point_count(),
            "Chart data accepted"
        );
        let interpretation =
            interpretation.unwrap_or_else(|| default_interpretation(input.question, rows, &data));
        Ok(AnalysisResult { interpretation, statistics: data })
    }
}

/// Parse, validate, and limit one model reply.
fn shape_reply(
    reply: &str,
    kind: ChartKind,
    point_limit: Option<usize>,
) -> Result<(ChartData, Option<String>), AnalysisError> {
    let obj = parse_json_object(reply)?;
    let data = chart::validate_shape(kind, &obj)?;
    let data = chart::apply_point_limit(data, point_limit);
    let interpretation = obj
        .get("interpretation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok((data, interpretation))
}

/// Find the JSON object in a reply, tolerating fences and chatter around it.
pub fn parse_json_object(reply: &str) -> Result<Value, AnalysisError> {
    let trimmed = reply.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let candidate = match (start, end) {
        (Some(s), Some(e)) if s < e => &trimmed[s..=e],
        _ => {
            return Err(AnalysisError::ShapeValidationFailed(
                "reply contains no JSON object".into(),
            ))
        }
    };

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| AnalysisError::ShapeValidationFailed(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(AnalysisError::ShapeValidationFailed("reply is not a JSON object".into()));
    }
    Ok(value)
}

fn default_interpretation(question: &str, rows: &ResultSet, data: &ChartData) -> String {
    format!(
        "{} based on {} result row(s) for \"{}\".",
        match data.kind() {
            ChartKind::PieChart => "Breakdown",
            ChartKind::WaterfallChart => "Step-by-step change",
        },
        rows.len(),
        question.trim()
    )
}

pub fn fallback_result(kind: ChartKind, row_count: usize) -> AnalysisResult {
    AnalysisResult {
        interpretation: format!(
            "The query returned {} row(s), but a detailed chart could not be produced. Showing a summary instead.",
            row_count
        ),
        statistics: ChartData::fallback(kind, row_count),
    }
}
