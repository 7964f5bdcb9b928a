//! chart.rs: Chart shapes and their structural contract.
//!
//! `ChartData` is the closed set of archetypes the chat UI can render. Each
//! variant has one validator that turns a loosely-typed model reply into a
//! shape that satisfies the contract, repairing what can be repaired:
//!
//! - labels/categories and values are arrays of equal length,
//! - every value is a finite number (pie: also non-negative),
//! - pie has at least one point, waterfall at least two.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AnalysisError;

pub const MIN_PIE_POINTS: usize = 1;
pub const MIN_WATERFALL_POINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    PieChart,
    WaterfallChart,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::PieChart => "pie_chart",
            ChartKind::WaterfallChart => "waterfall_chart",
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieShape {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallShape {
    pub categories: Vec<String>,
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increase_label_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrease_label_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_label_text: Option<String>,
}

/// Serialized as `{"type": "pie_chart", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChartData {
    PieChart(PieShape),
    WaterfallChart(WaterfallShape),
}

impl ChartData {
    pub fn kind(&self) -> ChartKind {
        match self {
            ChartData::PieChart(_) => ChartKind::PieChart,
            ChartData::WaterfallChart(_) => ChartKind::WaterfallChart,
        }
    }

    pub fn point_count(&self) -> usize {
        match self {
            ChartData::PieChart(p) => p.values.len(),
            ChartData::WaterfallChart(w) => w.values.len(),
        }
    }

    /// Whether the shape satisfies the contract as-is.
    pub fn is_structurally_valid(&self) -> bool {
        match self {
            ChartData::PieChart(p) => {
                p.labels.len() == p.values.len()
                    && p.values.len() >= MIN_PIE_POINTS
                    && p.values.iter().all(|v| v.is_finite() && *v >= 0.0)
                    && p.colors.as_ref().map_or(true, |c| c.len() == p.labels.len())
            }
            ChartData::WaterfallChart(w) => {
                w.categories.len() == w.values.len()
                    && w.values.len() >= MIN_WATERFALL_POINTS
                    && w.values.iter().all(|v| v.is_finite())
            }
        }
    }

    /// Single-slice pie used by the fixed error and no-data answers.
    pub fn single_slice(label: &str, value: f64) -> Self {
        ChartData::PieChart(PieShape {
            labels: vec![label.to_string()],
            values: vec![value],
            colors: None,
        })
    }

    /// Minimal chart returned once the retry budget is spent.
    pub fn fallback(kind: ChartKind, row_count: usize) -> Self {
        let n = row_count as f64;
        match kind {
            ChartKind::PieChart => Self::single_slice("Data Points", n),
            ChartKind::WaterfallChart => ChartData::WaterfallChart(WaterfallShape {
                categories: vec!["Start".into(), "Change".into(), "End".into()],
                values: vec![0.0, n, n],
                increase_label_text: None,
                decrease_label_text: None,
                total_label_text: None,
            }),
        }
    }
}

/// The terminal, externally visible artifact of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub interpretation: String,
    pub statistics: ChartData,
}

pub const NO_DATA_MESSAGE: &str = "No data available for analysis.";

impl AnalysisResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            interpretation: message.into(),
            statistics: ChartData::single_slice("Error", 100.0),
        }
    }

    pub fn no_data() -> Self {
        Self {
            interpretation: NO_DATA_MESSAGE.to_string(),
            statistics: ChartData::single_slice("No Data", 100.0),
        }
    }
}

// ── Coercion ─────────────────────────────────────────

/// JSON numbers and numeric strings ("1,204.50" included) become f64.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn optional_text(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn paired_arrays<'a>(
    obj: &'a Value,
    label_key: &str,
) -> Result<(&'a Vec<Value>, &'a Vec<Value>), AnalysisError> {
    let labels = obj
        .get(label_key)
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::ShapeValidationFailed(format!("'{}' is missing or not an array", label_key)))?;
    let values = obj
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::ShapeValidationFailed("'values' is missing or not an array".into()))?;

    if labels.len() != values.len() {
        return Err(AnalysisError::ShapeValidationFailed(format!(
            "{} {} but {} values",
            labels.len(),
            label_key,
            values.len()
        )));
    }
    Ok((labels, values))
}

// ── Validators ───────────────────────────────────────

/// Validate and repair a pie reply. Pairs whose value is not a
/// non-negative number are dropped; colors survive only if they were
/// parallel to the labels.
pub fn validate_pie(obj: &Value) -> Result<PieShape, AnalysisError> {
    let (raw_labels, raw_values) = paired_arrays(obj, "labels")?;

    let raw_colors: Option<Vec<Option<String>>> = obj
        .get("colors")
        .and_then(Value::as_array)
        .filter(|c| c.len() == raw_labels.len())
        .map(|c| c.iter().map(|v| v.as_str().map(str::to_string)).collect());

    let mut labels = Vec::with_capacity(raw_labels.len());
    let mut values = Vec::with_capacity(raw_values.len());
    let mut colors = Vec::with_capacity(raw_labels.len());
    for (i, (label, value)) in raw_labels.iter().zip(raw_values).enumerate() {
        let (Some(label), Some(value)) = (coerce_label(label), coerce_number(value)) else {
            continue;
        };
        if value < 0.0 {
            continue;
        }
        labels.push(label);
        values.push(value);
        colors.push(raw_colors.as_ref().and_then(|c| c[i].clone()));
    }

    if values.len() < MIN_PIE_POINTS {
        return Err(AnalysisError::ShapeValidationFailed(
            "no valid non-negative pie values".into(),
        ));
    }

    let colors = if colors.iter().all(Option::is_some) && raw_colors.is_some() {
        Some(colors.into_iter().flatten().collect())
    } else {
        None
    };

    Ok(PieShape { labels, values, colors })
}

/// Validate and repair a waterfall reply. Pairs whose value does not
/// coerce to a number are dropped; at least two must remain.
pub fn validate_waterfall(obj: &Value) -> Result<WaterfallShape, AnalysisError> {
    let (raw_categories, raw_values) = paired_arrays(obj, "categories")?;

    let (categories, values): (Vec<String>, Vec<f64>) = raw_categories
        .iter()
        .zip(raw_values)
        .filter_map(|(c, v)| Some((coerce_label(c)?, coerce_number(v)?)))
        .unzip();

    if values.len() < MIN_WATERFALL_POINTS {
        return Err(AnalysisError::ShapeValidationFailed(format!(
            "waterfall needs at least {} numeric points, got {}",
            MIN_WATERFALL_POINTS,
            values.len()
        )));
    }

    Ok(WaterfallShape {
        categories,
        values,
        increase_label_text: optional_text(obj, "increaseLabelText"),
        decrease_label_text: optional_text(obj, "decreaseLabelText"),
        total_label_text: optional_text(obj, "totalLabelText"),
    })
}

/// Validate a reply object as the given archetype.
pub fn validate_shape(kind: ChartKind, obj: &Value) -> Result<ChartData, AnalysisError> {
    match kind {
        ChartKind::PieChart => validate_pie(obj).map(ChartData::PieChart),
        ChartKind::WaterfallChart => validate_waterfall(obj).map(ChartData::WaterfallChart),
    }
}

// ── Point limit ──────────────────────────────────────

/// Keep the `limit` largest slices, in descending order.
pub fn limit_pie(shape: PieShape, limit: usize) -> PieShape {
    if shape.values.len() <= limit {
        return shape;
    }
    let mut order: Vec<usize> = (0..shape.values.len()).collect();
    order.sort_by(|&a, &b| shape.values[b].total_cmp(&shape.values[a]));
    order.truncate(limit);

    PieShape {
        labels: order.iter().map(|&i| shape.labels[i].clone()).collect(),
        values: order.iter().map(|&i| shape.values[i]).collect(),
        colors: shape
            .colors
            .as_ref()
            .map(|c| order.iter().map(|&i| c[i].clone()).collect()),
    }
}

/// Collapse a long waterfall into Start / Change / End.
pub fn collapse_waterfall(shape: WaterfallShape) -> WaterfallShape {
    let n = shape.values.len();
    if n <= 3 {
        return shape;
    }
    let change: f64 = shape.values[1..n - 1].iter().sum();
    WaterfallShape {
        categories: vec!["Start".into(), "Change".into(), "End".into()],
        values: vec![shape.values[0], change, shape.values[n - 1]],
        ..shape
    }
}

/// Cap the number of points at `limit`. Shorter valid shapes pass through.
pub fn apply_point_limit(data: ChartData, limit: Option<usize>) -> ChartData {
    match (data, limit) {
        (ChartData::PieChart(p), Some(limit)) => ChartData::PieChart(limit_pie(p, limit)),
        (ChartData::WaterfallChart(w), Some(_)) => ChartData::WaterfallChart(collapse_waterfall(w)),
        (data, None) => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let result = AnalysisResult {
            interpretation: "ok".into(),
            statistics: ChartData::PieChart(PieShape {
                labels: vec!["A".into()],
                values: vec![1.0],
                colors: None,
            }),
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(
            v,
            json!({"interpretation": "ok", "statistics": {"type": "pie_chart", "data": {"labels": ["A"], "values": [1.0]}}})
        );

        let wf = ChartData::WaterfallChart(WaterfallShape {
            categories: vec!["a".into(), "b".into()],
            values: vec![1.0, -1.0],
            increase_label_text: Some("Up".into()),
            decrease_label_text: None,
            total_label_text: None,
        });
        let v = serde_json::to_value(&wf).unwrap();
        assert_eq!(v["type"], "waterfall_chart");
        assert_eq!(v["data"]["increaseLabelText"], "Up");
        assert!(v["data"].get("decreaseLabelText").is_none());
    }

    #[test]
    fn test_pie_rejects_length_mismatch() {
        let err = validate_pie(&json!({"labels": ["a", "b"], "values": [1]})).unwrap_err();
        assert!(matches!(err, AnalysisError::ShapeValidationFailed(_)));
    }

    #[test]
    fn test_pie_rejects_missing_arrays() {
        assert!(validate_pie(&json!({"labels": "a", "values": [1]})).is_err());
        assert!(validate_pie(&json!({"labels": ["a"]})).is_err());
    }

    #[test]
    fn test_pie_drops_bad_pairs_and_keeps_parallel_colors() {
        let shape = validate_pie(&json!({
            "labels": ["Cash", "Card", "Bank", "Other"],
            "values": [3, "n/a", "12.5", -4],
            "colors": ["#111", "#222", "#333", "#444"],
        }))
        .unwrap();
        assert_eq!(shape.labels, vec!["Cash", "Bank"]);
        assert_eq!(shape.values, vec![3.0, 12.5]);
        assert_eq!(shape.colors, Some(vec!["#111".to_string(), "#333".to_string()]));
    }

    #[test]
    fn test_pie_drops_misaligned_colors() {
        let shape = validate_pie(&json!({
            "labels": ["a", "b"],
            "values": [1, 2],
            "colors": ["#111"],
        }))
        .unwrap();
        assert_eq!(shape.colors, None);
    }

    #[test]
    fn test_pie_all_invalid_fails() {
        assert!(validate_pie(&json!({"labels": ["a"], "values": [-1]})).is_err());
        assert!(validate_pie(&json!({"labels": [], "values": []})).is_err());
    }

    #[test]
    fn test_waterfall_accepts_negative_values() {
        let shape = validate_waterfall(&json!({
            "categories": ["Subtotal", "Discount", "Tax", "Shipping", "Total"],
            "values": [1000, -50, 75, 20, 1045],
        }))
        .unwrap();
        assert_eq!(shape.categories.len(), 5);
        assert_eq!(shape.values, vec![1000.0, -50.0, 75.0, 20.0, 1045.0]);
    }

    #[test]
    fn test_waterfall_needs_two_numeric_points() {
        let err = validate_waterfall(&json!({
            "categories": ["a", "b", "c"],
            "values": [1, "x", null],
        }))
        .unwrap_err();
        assert!(matches!(err, AnalysisError::ShapeValidationFailed(_)));

        let ok = validate_waterfall(&json!({
            "categories": ["a", "b", "c"],
            "values": [1, "x", "-2"],
        }))
        .unwrap();
        assert_eq!(ok.categories, vec!["a", "c"]);
        assert_eq!(ok.values, vec![1.0, -2.0]);
    }

    #[test]
    fn test_point_limit() {
        let pie = limit_pie(
            PieShape {
                labels: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                values: vec![1.0, 9.0, 5.0, 7.0],
                colors: None,
            },
            3,
        );
        assert_eq!(pie.labels, vec!["b", "d", "c"]);
        assert_eq!(pie.values, vec![9.0, 7.0, 5.0]);

        let wf = collapse_waterfall(WaterfallShape {
            categories: vec!["s".into(), "x".into(), "y".into(), "e".into()],
            values: vec![100.0, -10.0, 5.0, 95.0],
            increase_label_text: None,
            decrease_label_text: None,
            total_label_text: Some("Total".into()),
        });
        assert_eq!(wf.categories, vec!["Start", "Change", "End"]);
        assert_eq!(wf.values, vec![100.0, -5.0, 95.0]);
        assert_eq!(wf.total_label_text.as_deref(), Some("Total"));
    }

    #[test]
    fn test_point_limit_is_an_upper_bound() {
        let pie = ChartData::single_slice("Cash", 4.0);
        assert_eq!(apply_point_limit(pie.clone(), Some(3)), pie);

        let wf = ChartData::WaterfallChart(WaterfallShape {
            categories: vec!["Subtotal".into(), "Total".into()],
            values: vec![1000.0, 1045.0],
            increase_label_text: None,
            decrease_label_text: None,
            total_label_text: None,
        });
        let limited = apply_point_limit(wf.clone(), Some(3));
        assert_eq!(limited.point_count(), 2);
        assert_eq!(limited, wf);
    }

    #[test]
    fn test_fixed_results_are_valid() {
        assert!(AnalysisResult::error("boom").statistics.is_structurally_valid());
        assert!(AnalysisResult::no_data().statistics.is_structurally_valid());
        assert!(ChartData::fallback(ChartKind::PieChart, 7).is_structurally_valid());
        let wf = ChartData::fallback(ChartKind::WaterfallChart, 7);
        assert!(wf.is_structurally_valid());
        assert_eq!(wf.point_count(), 3);
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(&json!("1,204.50")), Some(1204.5));
        assert_eq!(coerce_number(&json!(true)), None);
        assert_eq!(coerce_number(&json!("NaN")), None);
    }
}
