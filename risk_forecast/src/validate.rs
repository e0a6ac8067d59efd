//! Dataset validation
//!
//! Turns a raw [`PanelTable`] into a typed [`Panel`]. Structural problems
//! (schema, duplicate keys, time order, missing targets) are fatal; sparse or
//! out-of-range signals only produce warnings.

use crate::config::PipelineConfig;
use crate::data::{Panel, PanelTable, Period, ResolvedSchema};
use crate::error::{PipelineError, PipelineWarning, Result};
use crate::horizon::Horizon;
use crate::targets::{TargetDeriver, TargetSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Shape of the validated dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub regions: usize,
    pub min_rows_per_region: usize,
    pub max_rows_per_region: usize,
    pub first_period: Option<Period>,
    pub last_period: Option<Period>,
    /// Fraction of missing values per signal column
    pub missing_rates: BTreeMap<String, f64>,
}

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema: ResolvedSchema,
    pub summary: DatasetSummary,
    pub target_sources: BTreeMap<Horizon, TargetSource>,
    pub warnings: Vec<PipelineWarning>,
}

/// Validated panel together with its report
#[derive(Debug, Clone)]
pub struct ValidatedDataset {
    pub panel: Panel,
    pub report: ValidationReport,
}

/// Checks a raw table against the configured schema
#[derive(Debug, Clone)]
pub struct DatasetValidator {
    config: PipelineConfig,
}

impl DatasetValidator {
    /// Create a new validator
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Validate a table and build the typed panel
    pub fn validate(&self, table: &PanelTable) -> Result<ValidatedDataset> {
        let schema = ResolvedSchema::resolve(&table.column_names(), &self.config)?;
        if table.is_empty() {
            return Err(PipelineError::Schema("Input table has no rows".to_string()));
        }

        let observations = table.observations(&schema)?;
        let panel = Panel::group(
            self.config.features.candidates.clone(),
            schema.outcomes.clone(),
            observations,
        );
        check_time_order(&panel)?;

        let deriver = TargetDeriver::new(&self.config.targets);
        let mut target_sources = BTreeMap::new();
        for &horizon in &self.config.training.horizons {
            target_sources.insert(horizon, deriver.source(&panel, horizon)?);
        }

        let summary = summarize(&panel);
        let warnings = self.quality_warnings(&panel, &summary);
        for warning in &warnings {
            warning.log();
        }

        info!(
            "Validated {} rows across {} regions ({} to {})",
            summary.rows,
            summary.regions,
            summary
                .first_period
                .map(|p| p.to_string())
                .unwrap_or_default(),
            summary
                .last_period
                .map(|p| p.to_string())
                .unwrap_or_default()
        );

        Ok(ValidatedDataset {
            panel,
            report: ValidationReport {
                schema,
                summary,
                target_sources,
                warnings,
            },
        })
    }

    fn quality_warnings(&self, panel: &Panel, summary: &DatasetSummary) -> Vec<PipelineWarning> {
        let validation = &self.config.validation;
        let mut warnings = Vec::new();

        for (idx, signal) in panel.signal_names().iter().enumerate() {
            let missing = summary.missing_rates.get(signal).copied().unwrap_or(0.0);
            if missing > validation.max_missing_fraction {
                warnings.push(PipelineWarning::DataQuality {
                    column: signal.clone(),
                    detail: format!(
                        "{:.1}% of values missing (limit {:.1}%)",
                        missing * 100.0,
                        validation.max_missing_fraction * 100.0
                    ),
                });
            }

            if let Some([lo, hi]) = validation.range_for(signal) {
                let outside = panel
                    .regions()
                    .flat_map(|(_, rows)| rows.iter())
                    .map(|obs| obs.signals[idx])
                    .filter(|v| v.is_finite() && (*v < lo || *v > hi))
                    .count();
                if outside > 0 {
                    warnings.push(PipelineWarning::DataQuality {
                        column: signal.clone(),
                        detail: format!("{} value(s) outside expected range [{}, {}]", outside, lo, hi),
                    });
                }
            }
        }

        warnings
    }
}

/// Reject a repeated `(region, period)` key, whether the dates are identical
/// or merely share a month, and any period sequence that runs backwards
fn check_time_order(panel: &Panel) -> Result<()> {
    for (region, rows) in panel.regions() {
        for pair in rows.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if previous.period == next.period {
                return Err(PipelineError::DuplicateKey {
                    region: region.to_string(),
                    date: next.date,
                });
            }
            if previous.period > next.period {
                return Err(PipelineError::NonMonotonicTime {
                    region: region.to_string(),
                    previous: previous.date,
                    next: next.date,
                });
            }
        }
    }
    Ok(())
}

fn summarize(panel: &Panel) -> DatasetSummary {
    let counts: Vec<usize> = panel.regions().map(|(_, rows)| rows.len()).collect();
    let first_period = panel
        .regions()
        .filter_map(|(_, rows)| rows.first().map(|o| o.period))
        .min();
    let last_period = panel
        .regions()
        .filter_map(|(_, rows)| rows.last().map(|o| o.period))
        .max();

    let total = panel.len().max(1) as f64;
    let missing_rates = panel
        .signal_names()
        .iter()
        .enumerate()
        .map(|(idx, signal)| {
            let missing = panel
                .regions()
                .flat_map(|(_, rows)| rows.iter())
                .filter(|obs| obs.signals[idx].is_nan())
                .count();
            (signal.clone(), missing as f64 / total)
        })
        .collect();

    DatasetSummary {
        rows: panel.len(),
        regions: panel.region_count(),
        min_rows_per_region: counts.iter().copied().min().unwrap_or(0),
        max_rows_per_region: counts.iter().copied().max().unwrap_or(0),
        first_period,
        last_period,
        missing_rates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use crate::config::{FeatureConfig, TrainingConfig};
    use crate::data::DataLoader;
    use polars::prelude::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            features: FeatureConfig {
                candidates: vec!["ndvi_anomaly".to_string()],
                ..Default::default()
            },
            training: TrainingConfig {
                horizons: vec![Horizon::H1],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn table(regions: &[&str], periods: &[&str], values: &[Option<f64>]) -> PanelTable {
        let labels: Vec<i64> = (0..regions.len() as i64).map(|i| i % 2).collect();
        let df = DataFrame::new(vec![
            Series::new("region", regions),
            Series::new("period", periods),
            Series::new("ndvi_anomaly", values),
            Series::new("risk_label", labels),
        ])
        .unwrap();
        DataLoader::from_dataframe(df)
    }

    #[test]
    fn test_valid_panel() {
        let t = table(
            &["b", "a", "a", "b", "a"],
            &["2024/01", "2024/02", "2024/01", "2024/02", "2024/03"],
            &[Some(0.1), Some(0.2), Some(0.3), None, Some(9.0)],
        );
        let validated = DatasetValidator::new(&config()).validate(&t).unwrap();

        let rows = validated.panel.observations("a").unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].period < w[1].period));

        let report = &validated.report;
        assert_eq!(report.summary.rows, 5);
        assert_eq!(report.summary.regions, 2);
        assert_eq!(report.summary.last_period, Some(Period::new(2024, 3).unwrap()));
        assert!((report.summary.missing_rates["ndvi_anomaly"] - 0.2).abs() < 1e-9);
        // 9.0 lies outside the default anomaly range
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.target_sources[&Horizon::H1],
            TargetSource::Shifted { .. }
        ));
    }

    #[test]
    fn test_duplicate_key() {
        let t = table(
            &["a", "a", "a"],
            &["2024-01-01", "2024-02-01", "2024-01-01"],
            &[Some(0.1), Some(0.2), Some(0.3)],
        );
        let err = DatasetValidator::new(&config()).validate(&t).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { ref region, .. } if region == "a"));
    }

    #[test]
    fn test_two_dates_in_one_month() {
        let t = table(
            &["a", "a", "a"],
            &["2024-01-01", "2024-01-15", "2024-02-01"],
            &[Some(0.1), Some(0.2), Some(0.3)],
        );
        let err = DatasetValidator::new(&config()).validate(&t).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateKey { ref region, date }
                if region == "a" && date == NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        ));
        assert!(err.to_string().contains("2024-01"));
    }

    #[test]
    fn test_unparseable_period() {
        let t = table(&["a", "a"], &["2024/01", "soon"], &[Some(0.1), Some(0.2)]);
        let err = DatasetValidator::new(&config()).validate(&t).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(ref msg) if msg.contains("soon")));
    }

    #[test]
    fn test_sparse_signal_warns() {
        let t = table(
            &["a", "a", "a", "a"],
            &["2024/01", "2024/02", "2024/03", "2024/04"],
            &[Some(0.1), None, None, Some(0.2)],
        );
        let report = DatasetValidator::new(&config()).validate(&t).unwrap().report;
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            PipelineWarning::DataQuality { detail, .. } if detail.contains("missing")
        )));
    }
}
