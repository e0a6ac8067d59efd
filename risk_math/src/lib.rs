//! # Risk Math
//!
//! Numeric building blocks for probabilistic risk classifiers.
//! This crate provides discrimination and calibration metrics, an isotonic
//! calibrator and the small transforms (scaling, logistic link, cyclical
//! month encoding) shared by the forecasting pipeline.

use thiserror::Error;

pub mod calibration;
pub mod classification;
pub mod transform;

pub use calibration::IsotonicCalibrator;
pub use classification::{brier_score, recall_at_fpr, roc_auc, wilson_interval};
pub use transform::{cyclical_month, logit, sigmoid, StandardScaler};

/// Errors that can occur in risk-related calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for risk math operations
pub type Result<T> = std::result::Result<T, MathError>;

/// Check that predictions and labels line up and are non-empty
pub(crate) fn check_lengths(scores: &[f64], labels: &[bool]) -> Result<()> {
    if scores.is_empty() {
        return Err(MathError::InsufficientData(
            "No predictions supplied".to_string(),
        ));
    }
    if scores.len() != labels.len() {
        return Err(MathError::InvalidInput(format!(
            "Predictions length ({}) doesn't match labels length ({})",
            scores.len(),
            labels.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(MathError::InvalidInput(
            "Predictions must be finite".to_string(),
        ));
    }
    Ok(())
}
