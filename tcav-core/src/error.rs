//! Error types for the tcav-core crate.

use thiserror::Error;

/// Top-level error type for TCAV runs.
///
/// Every variant is fatal to the run that produced it: the orchestrator
/// surfaces the first error it meets and returns no partial result.
#[derive(Debug, Error)]
pub enum TcavError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The concept set is empty or the non-concept population is too small
    /// to draw comparison splits from.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A stratified train/test partition cannot be formed.
    #[error("Cannot form stratified split: {0}")]
    DataInsufficiency(String),

    /// The score or test statistic is undefined for the given inputs.
    #[error("Degenerate score: {0}")]
    DegenerateScore(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Malformed output field '{field}': {reason}")]
    MalformedOutput { field: String, reason: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Trial task failed: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TcavError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn data_insufficiency(msg: impl Into<String>) -> Self {
        Self::DataInsufficiency(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateScore(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
