//! invoice-insight: natural-language analytics over invoice data.
//!
//! A question goes to a language model for SQL, the SQL runs read-only
//! against the invoice database, and the rows are turned into pie or
//! waterfall chart data the chat UI can draw.

pub mod analysis;
pub mod chart;
pub mod chart_classifier;
pub mod error;
pub mod invoice_db;
pub mod invoice_model;
pub mod llm;
pub mod llm_query;
pub mod logging;
pub mod query_schema;
pub mod settings;
pub mod shape_generator;
pub mod shape_prompts;

pub use analysis::{AnalysisResponse, Analyzer};
pub use chart::{AnalysisResult, ChartData, ChartKind};
pub use error::{AnalysisError, PipelineResult};
pub use invoice_db::{QueryExecutor, ResultSet, SqliteExecutor};
pub use llm::{LanguageModel, OpenRouterModel};
