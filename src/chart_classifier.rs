//! chart_classifier.rs: Picks the chart archetype for a question.
//!
//! The choice between composition (pie) and sequential change (waterfall)
//! depends on what was asked, so it is left to the model. Answers that
//! name neither archetype fall back to a pie chart.

use regex::Regex;
use tracing::{info, warn};

use crate::chart::ChartKind;
use crate::error::AnalysisError;
use crate::llm::LanguageModel;

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You choose chart types for invoice analytics.

Answer with exactly one word:
- pie_chart: the data shows how a whole splits into parts (shares, breakdowns, distributions by category)
- waterfall_chart: the data shows how a value builds up or changes step by step (subtotal to total, month over month changes, running balances)

No other text."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ChartKind,
    /// True when the model's answer was unusable and the default was taken.
    pub ambiguous: bool,
}

lazy_static::lazy_static! {
    static ref CHART_LABEL: Regex =
        Regex::new(r"(?i)\b(pie|waterfall)(?:[ _-]?chart)?\b").expect("valid chart label regex");
}

/// Map a model answer onto an archetype. The first label named as a whole
/// word wins, so trailing explanation text does not matter.
pub fn parse_chart_kind(answer: &str) -> Result<ChartKind, AnalysisError> {
    let label = CHART_LABEL
        .captures(answer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase());
    match label.as_deref() {
        Some("pie") => Ok(ChartKind::PieChart),
        Some("waterfall") => Ok(ChartKind::WaterfallChart),
        _ => Err(AnalysisError::ClassificationAmbiguous(
            answer.chars().take(60).collect(),
        )),
    }
}

pub async fn classify(model: &dyn LanguageModel, question: &str, rows_json: &str) -> Classification {
    let user_prompt = format!(
        "Question: {}\n\nQuery results (JSON rows):\n{}\n\nChart type:",
        question, rows_json
    );

    let parsed = match model.generate(CLASSIFIER_SYSTEM_PROMPT, &user_prompt, None).await {
        Ok(answer) => parse_chart_kind(&answer),
        Err(e) => Err(AnalysisError::ClassificationAmbiguous(e.to_string())),
    };

    match parsed {
        Ok(kind) => {
            info!(target: "pipeline", chart = %kind, "Chart type classified");
            Classification { kind, ambiguous: false }
        }
        Err(e) => {
            warn!(target: "pipeline", error = %e, "Defaulting to pie chart");
            Classification { kind: ChartKind::PieChart, ambiguous: true }
        }
    }
}
