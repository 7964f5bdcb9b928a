//! End-to-end runs of the analysis pipeline with scripted model and
//! database stubs, plus one run against a real SQLite file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use invoice_insight::analysis::Analyzer;
use invoice_insight::chart::{ChartData, NO_DATA_MESSAGE};
use invoice_insight::error::{AnalysisError, PipelineResult};
use invoice_insight::invoice_db::{QueryExecutor, ResultSet, Row, SqlParam, SqliteExecutor};
use invoice_insight::invoice_model::{InvoiceStore, NewCustomer, NewInvoice, NewInvoiceItem};
use invoice_insight::llm::{LanguageModel, LlmError, OutputSchema};
use invoice_insight::settings::{DatabaseSettings, PipelineSettings};
use invoice_insight::shape_prompts::RETRY_BUDGET;

// ── Stubs ────────────────────────────────────────────

/// Answers each pipeline stage from its own script.
struct StageModel {
    sql: String,
    chart_type: String,
    shapes: Mutex<Vec<String>>,
    sql_calls: AtomicUsize,
    classifier_calls: AtomicUsize,
    shape_calls: AtomicUsize,
}

impl StageModel {
    fn new(sql: &str, chart_type: &str, shapes: Vec<&str>) -> Self {
        let mut shapes: Vec<String> = shapes.into_iter().map(str::to_string).collect();
        shapes.reverse();
        Self {
            sql: sql.to_string(),
            chart_type: chart_type.to_string(),
            shapes: Mutex::new(shapes),
            sql_calls: AtomicUsize::new(0),
            classifier_calls: AtomicUsize::new(0),
            shape_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for StageModel {
    async fn generate(&self, system: &str, _user: &str, schema: Option<&OutputSchema>) -> Result<String, LlmError> {
        if schema.is_some() {
            self.shape_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.shapes.lock().unwrap().pop().unwrap_or_else(|| "{not json".to_string()));
        }
        if system.contains("SELECT") {
            self.sql_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.sql.clone())
        } else {
            self.classifier_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.chart_type.clone())
        }
    }
}

struct StubExecutor {
    outcome: PipelineResult<ResultSet>,
    calls: AtomicUsize,
}

impl StubExecutor {
    fn rows(rows: Vec<Row>) -> Self {
        Self { outcome: Ok(ResultSet::from_rows(rows)), calls: AtomicUsize::new(0) }
    }

    fn failing(message: &str) -> Self {
        Self { outcome: Err(AnalysisError::DatabaseError(message.into())), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl QueryExecutor for StubExecutor {
    async fn execute(&self, _sql: &str, _params: &[SqlParam]) -> PipelineResult<ResultSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn payment_rows() -> Vec<Row> {
    vec![
        row(&[("payment_method", json!("Bank Transfer")), ("count", json!(12))]),
        row(&[("payment_method", json!("Credit Card")), ("count", json!(7))]),
        row(&[("payment_method", json!("Cash")), ("count", json!(2))]),
    ]
}

fn analyzer(model: &Arc<StageModel>, executor: &Arc<StubExecutor>) -> Analyzer {
    Analyzer::new(model.clone(), executor.clone())
}

// ── Short circuits ───────────────────────────────────

#[tokio::test]
async fn blank_question_never_reaches_the_model() {
    let model = Arc::new(StageModel::new("SELECT 1", "pie_chart", vec![]));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));
    let analyzer = analyzer(&model, &executor);

    for question in ["", "   "] {
        let result = analyzer.analyze(question).await;
        assert_eq!(result.interpretation, AnalysisError::EmptyQuestion.to_string());
        assert_eq!(result.statistics, ChartData::single_slice("Error", 100.0));
    }
    assert_eq!(model.sql_calls.load(Ordering::SeqCst), 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

    let response = analyzer.respond(" ").await;
    assert!(!response.success);
    assert!(response.result.is_none());
}

#[tokio::test]
async fn zero_rows_skip_classification() {
    let model = Arc::new(StageModel::new("SELECT * FROM invoices WHERE 0", "pie_chart", vec![]));
    let executor = Arc::new(StubExecutor::rows(vec![]));

    let result = analyzer(&model, &executor).analyze("anything overdue?").await;
    assert_eq!(result.interpretation, NO_DATA_MESSAGE);
    assert_eq!(result.statistics, ChartData::single_slice("No Data", 100.0));
    assert_eq!(model.classifier_calls.load(Ordering::SeqCst), 0);
    assert_eq!(model.shape_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_select_reply_is_a_synthesis_failure() {
    let model = Arc::new(StageModel::new("I cannot help with that.", "pie_chart", vec![]));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));

    let response = analyzer(&model, &executor).respond("breakdown by method").await;
    assert!(!response.success);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    let chart = response.chart().unwrap();
    assert!(chart.interpretation.starts_with("Could not generate a SQL query"));
}

#[tokio::test]
async fn database_error_becomes_error_chart() {
    let model = Arc::new(StageModel::new("SELECT * FROM invoicez", "pie_chart", vec![]));
    let executor = Arc::new(StubExecutor::failing("no such table: invoicez"));

    let result = analyzer(&model, &executor).analyze("totals?").await;
    assert!(result.interpretation.contains("no such table: invoicez"));
    assert_eq!(result.statistics, ChartData::single_slice("Error", 100.0));
    assert_eq!(model.classifier_calls.load(Ordering::SeqCst), 0);
}

/// Takes longer than any sensible request timeout before answering.
struct SlowModel;

#[async_trait]
impl LanguageModel for SlowModel {
    async fn generate(&self, _system: &str, _user: &str, _schema: Option<&OutputSchema>) -> Result<String, LlmError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok("SELECT 1".to_string())
    }
}

#[tokio::test]
async fn slow_model_hits_request_timeout() {
    let executor = Arc::new(StubExecutor::rows(payment_rows()));
    let cfg = PipelineSettings { prompt_row_limit: 10, request_timeout_secs: Some(1) };
    let analyzer = Analyzer::with_settings(Arc::new(SlowModel), executor.clone(), &cfg);

    let result = analyzer.analyze("breakdown by method").await;
    assert_eq!(result.interpretation, "Analysis timed out after 1s");
    assert_eq!(result.statistics, ChartData::single_slice("Error", 100.0));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

    let err = analyzer.try_analyze("breakdown by method").await.unwrap_err();
    assert_eq!(err, AnalysisError::TimedOut(1));
}

// ── Happy paths ──────────────────────────────────────

#[tokio::test]
async fn payment_method_breakdown_is_a_pie() {
    let model = Arc::new(StageModel::new(
        "```sql\nSELECT payment_method, COUNT(*) AS count FROM invoices GROUP BY payment_method\n```",
        "pie_chart",
        vec![r#"{"interpretation": "Bank transfers dominate.", "labels": ["Bank Transfer", "Credit Card", "Cash"], "values": [12, 7, 2]}"#],
    ));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));

    let response = analyzer(&model, &executor).respond("What's the breakdown of invoices by payment method?").await;
    assert!(response.success);
    let chart = response.result.as_ref().unwrap();
    assert_eq!(chart.interpretation, "Bank transfers dominate.");
    match &chart.statistics {
        ChartData::PieChart(pie) => {
            assert_eq!(pie.labels, vec!["Bank Transfer", "Credit Card", "Cash"]);
            assert_eq!(pie.values, vec![12.0, 7.0, 2.0]);
        }
        other => panic!("expected pie, got {:?}", other),
    }

    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["success"], json!(true));
    assert_eq!(wire["result"]["statistics"]["type"], json!("pie_chart"));
    assert!(wire.get("error").is_none());
}

#[tokio::test]
async fn totals_build_up_is_a_waterfall() {
    let model = Arc::new(StageModel::new(
        "SELECT SUM(subtotal), SUM(discount), SUM(tax), SUM(shipping), SUM(total) FROM invoices",
        "waterfall_chart",
        vec![r#"{"categories": ["Subtotal", "Discount", "Tax", "Shipping", "Total"], "values": [1000, -50, 75, 20, 1045]}"#],
    ));
    let executor = Arc::new(StubExecutor::rows(vec![row(&[
        ("subtotal", json!(1000)),
        ("discount", json!(50)),
        ("tax", json!(75)),
        ("shipping", json!(20)),
        ("total", json!(1045)),
    ])]));

    let result = analyzer(&model, &executor).analyze("How do discount, tax, and shipping affect the total?").await;
    match &result.statistics {
        ChartData::WaterfallChart(wf) => {
            assert_eq!(wf.categories.len(), 5);
            assert_eq!(wf.values, vec![1000.0, -50.0, 75.0, 20.0, 1045.0]);
        }
        other => panic!("expected waterfall, got {:?}", other),
    }
    assert!(result.interpretation.contains("affect the total"));
}

// ── Retry loop ───────────────────────────────────────

#[tokio::test]
async fn malformed_replies_end_in_fallback() {
    let model = Arc::new(StageModel::new("SELECT payment_method FROM invoices", "pie_chart", vec![]));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));

    let result = analyzer(&model, &executor).analyze("breakdown?").await;
    assert_eq!(model.shape_calls.load(Ordering::SeqCst), RETRY_BUDGET);
    assert_eq!(result.statistics, ChartData::single_slice("Data Points", 3.0));
    assert!(result.statistics.is_structurally_valid());
}

#[tokio::test]
async fn waterfall_fallback_is_start_change_end() {
    let model = Arc::new(StageModel::new("SELECT 1", "waterfall_chart", vec!["[]", "{}", "nope"]));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));

    let result = analyzer(&model, &executor).analyze("how did it change?").await;
    match &result.statistics {
        ChartData::WaterfallChart(wf) => {
            assert_eq!(wf.categories, vec!["Start", "Change", "End"]);
            assert_eq!(wf.values, vec![0.0, 3.0, 3.0]);
        }
        other => panic!("expected waterfall, got {:?}", other),
    }
}

#[tokio::test]
async fn last_attempt_is_narrowed_to_three_points() {
    let model = Arc::new(StageModel::new(
        "SELECT payment_method FROM invoices",
        "pie_chart",
        vec![
            "no json here",
            r#"{"labels": ["a", "b"], "values": [1]}"#,
            r#"{"labels": ["a", "b", "c", "d", "e"], "values": [5, 4, 3, 2, 1]}"#,
        ],
    ));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));

    let result = analyzer(&model, &executor).analyze("breakdown?").await;
    assert_eq!(model.shape_calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.statistics.point_count(), 3);
}

#[tokio::test]
async fn unknown_chart_type_defaults_to_pie() {
    let model = Arc::new(StageModel::new(
        "SELECT 1",
        "bar chart please",
        vec![r#"{"labels": ["x"], "values": [1]}"#],
    ));
    let executor = Arc::new(StubExecutor::rows(payment_rows()));

    let result = analyzer(&model, &executor).analyze("q").await;
    assert!(matches!(result.statistics, ChartData::PieChart(_)));
}

// ── Real database ────────────────────────────────────

#[tokio::test]
async fn runs_against_sqlite_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("invoices.db");
    {
        let mut store = InvoiceStore::open(&path).unwrap();
        let acme = store
            .insert_customer(&NewCustomer { name: "Acme".into(), ..NewCustomer::default() })
            .unwrap();
        for (number, method, amount) in [("INV-1", "Cash", 100.0), ("INV-2", "Credit Card", 300.0), ("INV-3", "Cash", 50.0)] {
            store
                .insert_invoice(&NewInvoice {
                    invoice_number: number.into(),
                    invoice_date: chrono::NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
                    due_date: None,
                    customer_id: acme,
                    subtotal: amount,
                    discount: 0.0,
                    tax: 0.0,
                    shipping: 0.0,
                    total: amount,
                    payment_terms: None,
                    payment_method: Some(method.into()),
                    bank_details: None,
                    notes: None,
                    items: vec![NewInvoiceItem { description: "Service".into(), quantity: 1.0, unit_price: amount }],
                })
                .unwrap();
        }
    }

    let executor = SqliteExecutor::open(&path, &DatabaseSettings::default()).unwrap();
    let model = StageModel::new(
        "SELECT payment_method, SUM(total) AS total FROM invoices GROUP BY payment_method ORDER BY payment_method",
        "pie_chart",
        vec![r#"{"labels": ["Cash", "Credit Card"], "values": [150, 300]}"#],
    );
    let cfg = PipelineSettings { prompt_row_limit: 10, request_timeout_secs: Some(30) };
    let analyzer = Analyzer::with_settings(Arc::new(model), Arc::new(executor), &cfg);

    let result = analyzer.analyze("revenue by payment method").await;
    match &result.statistics {
        ChartData::PieChart(pie) => assert_eq!(pie.values, vec![150.0, 300.0]),
        other => panic!("expected pie, got {:?}", other),
    }
    assert!(result.interpretation.contains("2 result row(s)"));
}
