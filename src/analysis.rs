//! analysis.rs: Natural-language analytics over invoice data.
//!
//! question → SQL → rows → chart type → validated chart data.
//!
//! `Analyzer::analyze` is total: hard failures (blank question, no SQL,
//! database error, timeout) come back as an error-shaped `AnalysisResult`
//! with a single "Error" slice, so the chat UI always has something to draw.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chart::AnalysisResult;
use crate::chart_classifier;
use crate::error::{AnalysisError, PipelineResult};
use crate::invoice_db::QueryExecutor;
use crate::llm::LanguageModel;
use crate::llm_query;
use crate::settings::PipelineSettings;
use crate::shape_generator::ShapeGenerator;

// ─── Example questions shown to the user ─────────────────────────────────────

pub const EXAMPLE_QUESTIONS: &[&str] = &[
    "What's the breakdown of invoices by payment method?",
    "How do discount, tax, and shipping affect the total?",
    "Which customers account for most of our revenue?",
    "How did monthly invoice totals change this year?",
    "What share of line items comes from each product description?",
];

// ─── Response envelope ───────────────────────────────────────────────────────

/// `{success, result | error}` as handed to the chat layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AnalysisResult>,
}

impl AnalysisResponse {
    pub fn from_outcome(outcome: PipelineResult<AnalysisResult>) -> Self {
        match outcome {
            Ok(result) => Self { success: true, result: Some(result), error: None },
            Err(e) => Self { success: false, result: None, error: Some(AnalysisResult::error(e.to_string())) },
        }
    }

    /// Whichever result the envelope carries.
    pub fn chart(&self) -> Option<&AnalysisResult> {
        self.result.as_ref().or(self.error.as_ref())
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Analyzer {
    model: Arc<dyn LanguageModel>,
    executor: Arc<dyn QueryExecutor>,
    prompt_row_limit: usize,
    request_timeout: Option<Duration>,
}

impl Analyzer {
    pub fn new(model: Arc<dyn LanguageModel>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self::with_settings(model, executor, &PipelineSettings::default())
    }

    pub fn with_settings(
        model: Arc<dyn LanguageModel>,
        executor: Arc<dyn QueryExecutor>,
        cfg: &PipelineSettings,
    ) -> Self {
        Self {
            model,
            executor,
            prompt_row_limit: cfg.prompt_row_limit.max(1),
            request_timeout: cfg.request_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Answer a question with chart data. Never fails.
    pub async fn analyze(&self, question: &str) -> AnalysisResult {
        match self.try_analyze(question).await {
            Ok(result) => result,
            Err(e) => AnalysisResult::error(e.to_string()),
        }
    }

    /// Like `analyze`, wrapped in the chat-layer envelope.
    pub async fn respond(&self, question: &str) -> AnalysisResponse {
        AnalysisResponse::from_outcome(self.try_analyze(question).await)
    }

    fn log_early_exit(err: &AnalysisError) {
        if err.is_short_circuit() {
            info!(target: "pipeline", error = %err, "Analysis ended early");
        } else {
            error!(target: "pipeline", error = %err, "Stage error escaped its stage");
        }
    }

    /// Run the pipeline, surfacing the error that ended it early.
    pub async fn try_analyze(&self, question: &str) -> PipelineResult<AnalysisResult> {
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(question))
                .await
                .unwrap_or_else(|_| {
                    warn!(target: "pipeline", timeout_secs = limit.as_secs(), "Analysis timed out");
                    Err(AnalysisError::TimedOut(limit.as_secs()))
                }),
            None => self.run(question).await,
        };
        if let Err(e) = &outcome {
            Self::log_early_exit(e);
        }
        outcome
    }

    async fn run(&self, question: &str) -> PipelineResult<AnalysisResult> {
        info!(target: "pipeline", "Analysis requested: {}", question);

        let sql = llm_query::synthesize_sql(self.model.as_ref(), question).await?;
        info!(target: "pipeline", "Generated SQL: {}", sql);

        let rows = self.executor.execute(&sql, &[]).await?;
        if rows.is_empty() {
            info!(target: "pipeline", "Query returned no rows");
            return Ok(AnalysisResult::no_data());
        }

        let rows_json = rows.to_prompt_json(self.prompt_row_limit);
        let classification = chart_classifier::classify(self.model.as_ref(), question, &rows_json).await;

        let outcome = ShapeGenerator::new(self.model.as_ref(), self.prompt_row_limit)
            .generate(question.trim(), classification.kind, &rows)
            .await;

        info!(
            target: "pipeline",
            rows = rows.len(),
            chart = %classification.kind,
            attempts = outcome.attempts,
            fell_back = outcome.fell_back,
            chart_defaulted = classification.ambiguous,
            "Analysis complete"
        );
        Ok(outcome.result)
    }
}
