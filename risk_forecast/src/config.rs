//! Pipeline configuration
//!
//! Loaded from a TOML document. Every option has a default, so an empty
//! document is a valid configuration. All checks run at load time; a
//! configuration that passes [`PipelineConfig::validate`] never fails later
//! for a configuration reason.

use crate::categorize::RiskThresholds;
use crate::error::{PipelineError, Result};
use crate::horizon::Horizon;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Column resolution for the raw input table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Explicit region column; when unset the aliases are tried in order
    pub region_column: Option<String>,
    /// Explicit period column; when unset the aliases are tried in order
    pub period_column: Option<String>,
    pub region_aliases: Vec<String>,
    pub period_aliases: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            region_column: None,
            period_column: None,
            region_aliases: ["region", "county", "area", "location", "id"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            period_aliases: ["period", "date", "month", "time", "timestamp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Feature engineering options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Signal columns to engineer
    pub candidates: Vec<String>,
    /// Lag offsets in periods
    pub lags: Vec<usize>,
    /// Add sine/cosine month-of-year encoding
    pub seasonality: bool,
    /// Add first differences versus the prior period
    pub diffs: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                "ndvi_anomaly".to_string(),
                "rainfall_anomaly".to_string(),
                "food_price_inflation".to_string(),
                "temp_anomaly".to_string(),
            ],
            lags: vec![1, 2],
            seasonality: true,
            diffs: true,
        }
    }
}

impl FeatureConfig {
    /// Longest look-back any feature needs
    pub fn required_history(&self) -> usize {
        let max_lag = self.lags.iter().copied().max().unwrap_or(0);
        if self.diffs {
            max_lag.max(1)
        } else {
            max_lag
        }
    }
}

/// Target derivation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Outcome column shifted per horizon when no explicit label exists
    pub base_column: String,
    /// Explicit label column overrides keyed by horizon (`h1`, `2`, ...);
    /// horizons not listed use `y_h{h}`
    pub explicit_columns: BTreeMap<String, String>,
    /// Outcome values at or above this are the positive class
    pub positive_threshold: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_column: "risk_label".to_string(),
            explicit_columns: BTreeMap::new(),
            positive_threshold: 1.0,
        }
    }
}

impl TargetConfig {
    /// Explicit label column name for a horizon
    pub fn explicit_column(&self, horizon: Horizon) -> String {
        self.explicit_columns
            .iter()
            .find(|(key, _)| key.parse::<Horizon>().ok() == Some(horizon))
            .map(|(_, column)| column.clone())
            .unwrap_or_else(|| horizon.label_column())
    }
}

/// Per-horizon risk cut points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub h1: RiskThresholds,
    pub h2: RiskThresholds,
    pub h3: RiskThresholds,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            h1: RiskThresholds::new_unchecked(0.60, 0.35),
            h2: RiskThresholds::new_unchecked(0.57, 0.33),
            h3: RiskThresholds::new_unchecked(0.55, 0.30),
        }
    }
}

impl ThresholdConfig {
    /// Thresholds for one horizon
    pub fn for_horizon(&self, horizon: Horizon) -> RiskThresholds {
        match horizon.periods() {
            1 => self.h1,
            2 => self.h2,
            _ => self.h3,
        }
    }
}

/// Gradient-boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmParams {
    /// Number of boosting iterations (trees)
    pub n_estimators: usize,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Minimum samples required in a leaf node
    pub min_samples_leaf: usize,
    /// Fraction of rows sampled for each tree
    pub subsample: f64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 3,
            learning_rate: 0.1,
            min_samples_leaf: 1,
            subsample: 1.0,
        }
    }
}

/// Logistic-regression hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// L2 penalty strength
    pub l2: f64,
    /// Stop once the largest gradient component falls below this
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.1,
            l2: 1.0,
            tolerance: 1e-6,
        }
    }
}

/// Training options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Preferred classifier family
    pub model_type: String,
    pub random_state: u64,
    /// Probability calibration method; only `isotonic` is supported
    pub calibration: String,
    /// Validation scheme; only `rolling_origin` is supported
    pub test_strategy: String,
    pub horizons: Vec<Horizon>,
    pub n_folds: usize,
    /// Minimum rows in any fold's training or validation partition
    pub min_fold_rows: usize,
    /// Purge training rows whose label is realized inside the validation block
    pub embargo: bool,
    /// False-positive rate of the recall operating point
    pub recall_fpr: f64,
    /// Abort the run when any horizon cannot be trained
    pub require_all_horizons: bool,
    pub gbm: GbmParams,
    pub logistic: LogisticParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_type: "gradient_boosting".to_string(),
            random_state: 42,
            calibration: "isotonic".to_string(),
            test_strategy: "rolling_origin".to_string(),
            horizons: Horizon::ALL.to_vec(),
            n_folds: 3,
            min_fold_rows: 3,
            embargo: false,
            recall_fpr: 0.2,
            require_all_horizons: false,
            gbm: GbmParams::default(),
            logistic: LogisticParams::default(),
        }
    }
}

/// Dataset validation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Warn when a signal column's missing fraction exceeds this
    pub max_missing_fraction: f64,
    /// Expected value ranges per signal column
    pub signal_ranges: BTreeMap<String, [f64; 2]>,
    /// Range applied to `*_anomaly` signals without an explicit entry
    pub anomaly_range: Option<[f64; 2]>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_missing_fraction: 0.2,
            signal_ranges: BTreeMap::new(),
            anomaly_range: Some([-5.0, 5.0]),
        }
    }
}

impl ValidationConfig {
    /// Expected range for a signal, if any
    pub fn range_for(&self, signal: &str) -> Option<[f64; 2]> {
        self.signal_ranges.get(signal).copied().or_else(|| {
            if signal.ends_with("_anomaly") {
                self.anomaly_range
            } else {
                None
            }
        })
    }
}

/// Forecast emission options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Nominal coverage of the uncertainty interval
    pub interval_level: f64,
    /// Number of reliability bins in the residual profile
    pub residual_bins: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            interval_level: 0.9,
            residual_bins: 5,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema: SchemaConfig,
    pub features: FeatureConfig,
    pub targets: TargetConfig,
    pub thresholds: ThresholdConfig,
    pub training: TrainingConfig,
    pub validation: ValidationConfig,
    pub forecast: ForecastConfig,
}

impl PipelineConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: PipelineConfig = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Cannot serialise configuration: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sort and deduplicate list-valued options
    pub fn normalize(&mut self) {
        self.features.lags.sort_unstable();
        self.features.lags.dedup();
        self.training.horizons.sort_unstable();
        self.training.horizons.dedup();
        self.training.model_type = self.training.model_type.trim().to_lowercase();
        self.training.calibration = self.training.calibration.trim().to_lowercase();
        self.training.test_strategy = self
            .training
            .test_strategy
            .trim()
            .to_lowercase()
            .replace('-', "_");
    }

    /// Check every option; called before any data is touched
    pub fn validate(&self) -> Result<()> {
        for horizon in Horizon::ALL {
            self.thresholds.for_horizon(horizon).validate(horizon)?;
        }

        if self.features.candidates.is_empty() {
            return Err(PipelineError::Config(
                "features.candidates must name at least one signal column".to_string(),
            ));
        }
        if self.features.lags.iter().any(|&k| k == 0) {
            return Err(PipelineError::Config(
                "features.lags must be positive integers".to_string(),
            ));
        }

        if self.training.calibration != "isotonic" {
            return Err(PipelineError::Config(format!(
                "Unsupported calibration '{}'; only 'isotonic' is available",
                self.training.calibration
            )));
        }
        if self.training.test_strategy != "rolling_origin" {
            return Err(PipelineError::Config(format!(
                "Unsupported test strategy '{}'; only 'rolling_origin' is available",
                self.training.test_strategy
            )));
        }
        crate::models::ModelFamily::parse(&self.training.model_type)?;
        if self.training.horizons.is_empty() {
            return Err(PipelineError::Config(
                "training.horizons must list at least one horizon".to_string(),
            ));
        }
        if self.training.n_folds < 2 {
            return Err(PipelineError::Config(format!(
                "training.n_folds must be at least 2 for cross-fitted calibration, got {}",
                self.training.n_folds
            )));
        }
        if self.training.min_fold_rows == 0 {
            return Err(PipelineError::Config(
                "training.min_fold_rows must be positive".to_string(),
            ));
        }
        if !(self.training.recall_fpr > 0.0 && self.training.recall_fpr < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.recall_fpr must lie in (0, 1), got {}",
                self.training.recall_fpr
            )));
        }

        let gbm = &self.training.gbm;
        if gbm.n_estimators == 0
            || gbm.max_depth == 0
            || gbm.min_samples_leaf == 0
            || gbm.learning_rate <= 0.0
            || !(gbm.subsample > 0.0 && gbm.subsample <= 1.0)
        {
            return Err(PipelineError::Config(format!(
                "Invalid gradient boosting parameters: {:?}",
                gbm
            )));
        }
        let logistic = &self.training.logistic;
        if logistic.max_iter == 0 || logistic.learning_rate <= 0.0 || logistic.l2 < 0.0 {
            return Err(PipelineError::Config(format!(
                "Invalid logistic parameters: {:?}",
                logistic
            )));
        }

        if !(0.0..=1.0).contains(&self.validation.max_missing_fraction) {
            return Err(PipelineError::Config(format!(
                "validation.max_missing_fraction must lie in [0, 1], got {}",
                self.validation.max_missing_fraction
            )));
        }
        let ranges = self
            .validation
            .signal_ranges
            .values()
            .chain(self.validation.anomaly_range.iter());
        for [lo, hi] in ranges {
            if lo > hi {
                return Err(PipelineError::Config(format!(
                    "Signal range [{}, {}] has lower bound above upper bound",
                    lo, hi
                )));
            }
        }

        if !(self.forecast.interval_level > 0.0 && self.forecast.interval_level < 1.0) {
            return Err(PipelineError::Config(format!(
                "forecast.interval_level must lie in (0, 1), got {}",
                self.forecast.interval_level
            )));
        }
        if self.forecast.residual_bins == 0 {
            return Err(PipelineError::Config(
                "forecast.residual_bins must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.features.required_history(), 2);
        assert_eq!(config.thresholds.for_horizon(Horizon::H2).red, 0.57);
    }

    #[test]
    fn test_inverted_thresholds_rejected_at_load() {
        let doc = r#"
            [thresholds.h2]
            red = 0.3
            yellow = 0.5
        "#;
        let err = PipelineConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidThresholds { horizon, .. } if horizon == Horizon::H2
        ));
    }

    #[test]
    fn test_lags_are_normalized() {
        let doc = r#"
            [features]
            candidates = ["ndvi"]
            lags = [3, 1, 3]
            diffs = false
        "#;
        let config = PipelineConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.features.lags, vec![1, 3]);
        assert_eq!(config.features.required_history(), 3);

        assert!(PipelineConfig::from_toml_str("[features]\nlags = [0]").is_err());
    }

    #[test]
    fn test_unsupported_options_rejected() {
        assert!(PipelineConfig::from_toml_str("[training]\ncalibration = \"platt\"").is_err());
        assert!(PipelineConfig::from_toml_str("[training]\ntest_strategy = \"shuffle\"").is_err());
        assert!(PipelineConfig::from_toml_str("[training]\nmodel_type = \"svm\"").is_err());
        assert!(PipelineConfig::from_toml_str("[training]\nn_folds = 1").is_err());

        let config =
            PipelineConfig::from_toml_str("[training]\ntest_strategy = \"Rolling-Origin\"").unwrap();
        assert_eq!(config.training.test_strategy, "rolling_origin");
    }

    #[test]
    fn test_explicit_column_lookup() {
        let doc = r#"
            [targets.explicit_columns]
            "2_month" = "label_two"
        "#;
        let config = PipelineConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.targets.explicit_column(Horizon::H2), "label_two");
        assert_eq!(config.targets.explicit_column(Horizon::H1), "y_h1");
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let config = PipelineConfig::default();
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}
