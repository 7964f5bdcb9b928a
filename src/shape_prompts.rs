//! shape_prompts.rs: Prompt table for the chart-shaping retry loop.
//!
//! Entry `n` is used for attempt `n`. Later entries give the model fewer
//! degrees of freedom; the last one asks for exactly three points.

use serde_json::json;

use crate::chart::ChartKind;
use crate::llm::OutputSchema;

/// Everything a strategy may look at when writing its prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub question: &'a str,
    pub kind: ChartKind,
    pub rows_json: &'a str,
    pub schema: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptText {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptStrategy {
    pub name: &'static str,
    /// Points kept from a valid reply; `None` keeps them all.
    pub point_limit: Option<usize>,
    pub build: fn(&PromptInput<'_>) -> PromptText,
}

pub const PROMPT_STRATEGIES: [PromptStrategy; 3] = [
    PromptStrategy { name: "full", point_limit: None, build: full_prompt },
    PromptStrategy { name: "procedural", point_limit: None, build: procedural_prompt },
    PromptStrategy { name: "minimal", point_limit: Some(3), build: minimal_prompt },
];

/// Number of shape-generation attempts before the fallback chart.
pub const RETRY_BUDGET: usize = PROMPT_STRATEGIES.len();

fn label_key(kind: ChartKind) -> &'static str {
    match kind {
        ChartKind::PieChart => "labels",
        ChartKind::WaterfallChart => "categories",
    }
}

/// Strict output schema handed to the model for this archetype.
pub fn output_schema(kind: ChartKind) -> OutputSchema {
    let key = label_key(kind);
    OutputSchema {
        name: kind.as_str(),
        schema: json!({
            "type": "object",
            "properties": {
                "interpretation": { "type": "string" },
                key: { "type": "array", "items": { "type": "string" } },
                "values": { "type": "array", "items": { "type": "number" } }
            },
            "required": ["interpretation", key, "values"],
            "additionalProperties": false
        }),
    }
}

fn system_prompt(input: &PromptInput<'_>) -> String {
    format!(
        r#"You turn invoice query results into chart data for a {kind}.

The results come from this database schema:
```sql
{schema}
```

Reply with a single JSON object only. No markdown, no explanation outside the JSON."#,
        kind = input.kind,
        schema = input.schema
    )
}

fn example(kind: ChartKind) -> &'static str {
    match kind {
        ChartKind::PieChart => {
            r#"{"interpretation": "Bank transfers account for most invoices.", "labels": ["Bank Transfer", "Credit Card", "Cash"], "values": [12, 5, 2]}"#
        }
        ChartKind::WaterfallChart => {
            r#"{"interpretation": "Tax and shipping outweigh the discount.", "categories": ["Subtotal", "Discount", "Tax", "Shipping", "Total"], "values": [1000, -50, 75, 20, 1045]}"#
        }
    }
}

fn archetype_rules(kind: ChartKind) -> &'static str {
    match kind {
        ChartKind::PieChart => {
            "- \"labels\" are the slice names, \"values\" the slice sizes\n- every value is a non-negative number"
        }
        ChartKind::WaterfallChart => {
            "- \"categories\" are the steps in order, \"values\" the change at each step\n- decreases are negative numbers\n- at least 2 steps"
        }
    }
}

fn full_prompt(input: &PromptInput<'_>) -> PromptText {
    let key = label_key(input.kind);
    let user = format!(
        r#"Question: {question}

Query results (JSON rows):
{rows}

Produce chart data with this shape:
{{"interpretation": string, "{key}": string[], "values": number[]}}

Rules:
{rules}
- "{key}" and "values" MUST have exactly the same length
- "interpretation" is one or two sentences answering the question

Example:
{example}"#,
        question = input.question,
        rows = input.rows_json,
        key = key,
        rules = archetype_rules(input.kind),
        example = example(input.kind),
    );
    PromptText { system: system_prompt(input), user }
}

fn procedural_prompt(input: &PromptInput<'_>) -> PromptText {
    let key = label_key(input.kind);
    let user = format!(
        r#"Question: {question}

Query results (JSON rows):
{rows}

Your previous answer had a different number of {key} and values. Follow these steps exactly:
1. Decide the list of {key}. Count them: call it N.
2. Write exactly one number for each of the N {key}, in the same order.
3. Count the values. The count MUST equal N.
4. Every value is a plain JSON number (no quotes, no units, no currency symbols).
5. Output {{"interpretation": string, "{key}": [...N strings...], "values": [...N numbers...]}}.

{rules}"#,
        question = input.question,
        rows = input.rows_json,
        key = key,
        rules = archetype_rules(input.kind),
    );
    PromptText { system: system_prompt(input), user }
}

fn minimal_prompt(input: &PromptInput<'_>) -> PromptText {
    let (instruction, template) = match input.kind {
        ChartKind::PieChart => (
            "Pick the 3 largest categories in the results.",
            r#"{"interpretation": "...", "labels": ["<first>", "<second>", "<third>"], "values": [<n1>, <n2>, <n3>]}"#,
        ),
        ChartKind::WaterfallChart => (
            "Summarise the results as a starting amount, the net change, and the ending amount.",
            r#"{"interpretation": "...", "categories": ["Start", "Change", "End"], "values": [<start>, <change>, <end>]}"#,
        ),
    };
    let user = format!(
        r#"Question: {question}

Query results (JSON rows):
{rows}

{instruction}
Answer with EXACTLY 3 data points, filling in this template:
{template}
All values are plain non-quoted numbers."#,
        question = input.question,
        rows = input.rows_json,
        instruction = instruction,
        template = template,
    );
    PromptText { system: system_prompt(input), user }
}
