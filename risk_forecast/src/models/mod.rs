//! Binary classifiers used by the trainer
//!
//! The set of families is closed and chosen once, when the configuration is
//! loaded. Gradient boosting comes from the optional `gbdt` dependency behind
//! the `boosting` cargo feature; when it is compiled out a request for it
//! resolves to logistic regression with a [`PipelineWarning::ModelFallback`].

#[cfg(feature = "boosting")]
pub mod gbm;
pub mod logistic;

use crate::config::TrainingConfig;
use crate::error::{PipelineError, PipelineWarning, Result};
#[cfg(feature = "boosting")]
use gbm::GradientBoostedTrees;
use logistic::LogisticModel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifier family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    GradientBoosting,
    Logistic,
}

impl ModelFamily {
    /// Parse a configured model type
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "gradient_boosting" | "gbm" | "xgboost" | "lightgbm" | "boosting" => {
                Ok(ModelFamily::GradientBoosting)
            }
            "logistic" | "logistic_regression" | "logreg" => Ok(ModelFamily::Logistic),
            other => Err(PipelineError::Config(format!(
                "Unknown model type '{}'; expected 'gradient_boosting' or 'logistic'",
                other
            ))),
        }
    }

    /// Family actually available in this build, with a warning on fallback
    pub fn resolve(self) -> (ModelFamily, Option<PipelineWarning>) {
        match self {
            ModelFamily::GradientBoosting if !cfg!(feature = "boosting") => (
                ModelFamily::Logistic,
                Some(PipelineWarning::ModelFallback {
                    requested: ModelFamily::GradientBoosting.to_string(),
                    used: ModelFamily::Logistic.to_string(),
                    reason: "built without the 'boosting' feature".to_string(),
                }),
            ),
            family => (family, None),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::GradientBoosting => f.write_str("gradient_boosting"),
            ModelFamily::Logistic => f.write_str("logistic"),
        }
    }
}

/// Replace missing feature values with zero
pub fn impute(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .map(|&v| if v.is_finite() { v } else { 0.0 })
        .collect()
}

/// A model that scores feature rows
pub trait Classifier {
    /// Uncalibrated probability of the positive class
    fn predict_proba(&self, features: &[f64]) -> f64;
}

/// Fitted model of either family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FittedModel {
    #[cfg(feature = "boosting")]
    GradientBoosting(GradientBoostedTrees),
    Logistic(LogisticModel),
}

impl FittedModel {
    pub fn family(&self) -> ModelFamily {
        match self {
            #[cfg(feature = "boosting")]
            FittedModel::GradientBoosting(_) => ModelFamily::GradientBoosting,
            FittedModel::Logistic(_) => ModelFamily::Logistic,
        }
    }

    /// Score many rows
    pub fn predict_all(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        match self {
            #[cfg(feature = "boosting")]
            FittedModel::GradientBoosting(model) => {
                let rows: Vec<Vec<f64>> = rows.iter().map(|r| impute(r)).collect();
                model.predict_batch(&rows)
            }
            _ => rows.iter().map(|row| self.predict_proba(row)).collect(),
        }
    }
}

impl Classifier for FittedModel {
    fn predict_proba(&self, features: &[f64]) -> f64 {
        let row = impute(features);
        match self {
            #[cfg(feature = "boosting")]
            FittedModel::GradientBoosting(model) => model.predict_proba(&row),
            FittedModel::Logistic(model) => model.predict_proba(&row),
        }
    }
}

/// Fits models of the resolved family
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    family: ModelFamily,
    config: TrainingConfig,
}

impl ModelTrainer {
    /// Resolve the configured family; the returned warning is set on fallback
    pub fn from_config(config: &TrainingConfig) -> Result<(Self, Option<PipelineWarning>)> {
        let (family, warning) = ModelFamily::parse(&config.model_type)?.resolve();
        let trainer = Self {
            family,
            config: config.clone(),
        };
        Ok((trainer, warning))
    }

    /// Family used by this trainer
    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Fit on rows and binary labels
    pub fn fit(&self, rows: &[Vec<f64>], labels: &[bool]) -> Result<FittedModel> {
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(PipelineError::Math(risk_math::MathError::InvalidInput(format!(
                "Cannot fit on {} rows with {} labels",
                rows.len(),
                labels.len()
            ))));
        }
        let rows: Vec<Vec<f64>> = rows.iter().map(|r| impute(r)).collect();

        match self.family {
            #[cfg(feature = "boosting")]
            ModelFamily::GradientBoosting => Ok(FittedModel::GradientBoosting(
                GradientBoostedTrees::fit(&rows, labels, &self.config.gbm, self.config.random_state)?,
            )),
            #[cfg(not(feature = "boosting"))]
            ModelFamily::GradientBoosting => Ok(FittedModel::Logistic(LogisticModel::fit(
                &rows,
                labels,
                &self.config.logistic,
            )?)),
            ModelFamily::Logistic => Ok(FittedModel::Logistic(LogisticModel::fit(
                &rows,
                labels,
                &self.config.logistic,
            )?)),
        }
    }
}

/// Clamped positive rate used as the starting prediction
pub(crate) fn base_rate(labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&y| y).count() as f64;
    (positives / labels.len().max(1) as f64).clamp(1e-6, 1.0 - 1e-6)
}
