//! Error and warning types for the risk_forecast crate

use crate::horizon::Horizon;
use chrono::NaiveDate;
use polars::prelude::PolarsError;
use risk_math::MathError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fatal errors raised by the forecasting pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Required columns are absent or values cannot be interpreted
    #[error("Schema error: {0}")]
    Schema(String),

    /// A (region, period) pair occurs more than once
    #[error("Duplicate key: region '{region}' has more than one observation in the month of {date}")]
    DuplicateKey { region: String, date: NaiveDate },

    /// Periods within a region run backwards after sorting
    #[error("Non-monotonic time in region '{region}': {previous} is followed by {next}")]
    NonMonotonicTime {
        region: String,
        previous: NaiveDate,
        next: NaiveDate,
    },

    /// No observation can ever supply a realized outcome for the horizon
    #[error("Missing target for horizon {horizon}: {reason}")]
    MissingTarget { horizon: Horizon, reason: String },

    /// A rolling-origin fold is too small to train or evaluate on
    #[error("Insufficient data for horizon {horizon}: {reason}")]
    InsufficientData { horizon: Horizon, reason: String },

    /// Risk thresholds violate red > yellow >= 0 and red <= 1
    #[error("Invalid thresholds for horizon {horizon}: red={red}, yellow={yellow} (need 0 <= yellow < red <= 1)")]
    InvalidThresholds { horizon: Horizon, red: f64, yellow: f64 },

    /// Any other configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from a numeric routine
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    Polars(String),

    /// Error writing tabular output
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error (de)serializing artifacts
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error parsing the configuration document
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// Errors that only invalidate one horizon rather than the whole run
    pub fn is_horizon_local(&self) -> bool {
        matches!(self, PipelineError::InsufficientData { .. })
    }
}

impl From<PolarsError> for PipelineError {
    fn from(err: PolarsError) -> Self {
        PipelineError::Polars(err.to_string())
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Non-fatal conditions; logged, counted and listed in the run manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// A signal column is too sparse or holds out-of-range values
    DataQuality { column: String, detail: String },
    /// A region lacks the lag history needed for some of its periods
    InsufficientHistory { region: String, detail: String },
    /// The requested classifier family is unavailable and another was used
    ModelFallback {
        requested: String,
        used: String,
        reason: String,
    },
}

impl PipelineWarning {
    /// Emit the warning through `tracing`
    pub fn log(&self) {
        tracing::warn!("{}", self);
    }
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::DataQuality { column, detail } => {
                write!(f, "Data quality warning on '{}': {}", column, detail)
            }
            PipelineWarning::InsufficientHistory { region, detail } => {
                write!(f, "Insufficient history for region '{}': {}", region, detail)
            }
            PipelineWarning::ModelFallback {
                requested,
                used,
                reason,
            } => write!(
                f,
                "Model fallback: requested {}, using {} ({})",
                requested, used, reason
            ),
        }
    }
}
