//! error.rs: Error taxonomy for the analytics pipeline.
//!
//! Only the first five variants may cut an analysis short, and the
//! orchestrator turns those into an error-shaped `AnalysisResult` before
//! they reach a caller. The last two never leave their stage.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Could not generate a SQL query: {0}")]
    SynthesisFailed(String),

    #[error("Generated query is empty")]
    InvalidQuery,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Analysis timed out after {0}s")]
    TimedOut(u64),

    /// Raised inside the shape retry loop only.
    #[error("Chart data failed validation: {0}")]
    ShapeValidationFailed(String),

    /// Raised inside the classifier only; resolved by defaulting to a pie chart.
    #[error("Chart type answer not recognised: {0}")]
    ClassificationAmbiguous(String),
}

impl AnalysisError {
    /// Whether this error is allowed to end an analysis early.
    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self,
            AnalysisError::EmptyQuestion
                | AnalysisError::SynthesisFailed(_)
                | AnalysisError::InvalidQuery
                | AnalysisError::DatabaseError(_)
                | AnalysisError::TimedOut(_)
        )
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(err: rusqlite::Error) -> Self {
        AnalysisError::DatabaseError(err.to_string())
    }
}

impl From<r2d2::Error> for AnalysisError {
    fn from(err: r2d2::Error) -> Self {
        AnalysisError::DatabaseError(format!("connection pool: {}", err))
    }
}

pub type PipelineResult<T> = Result<T, AnalysisError>;
