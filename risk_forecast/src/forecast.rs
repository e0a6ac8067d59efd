//! Forecast emission with uncertainty bounds
//!
//! Bounds come from a reliability profile of cross-fitted calibrated
//! predictions gathered during rolling-origin evaluation: each fold's scores
//! are calibrated by a calibrator that never saw that fold. Predictions are
//! binned on `[0, 1]`; a bin remembers its row count, positives and mean
//! residual `observed - predicted`. At forecast time the bin of `p` shifts
//! the interval centre by its residual, and the Wilson score bounds of the
//! bin's observed rate set how far the interval reaches on either side.

use crate::artifact::ModelArtifact;
use crate::categorize::RiskTier;
use crate::config::ThresholdConfig;
use crate::data::{Panel, Period};
use crate::error::{PipelineError, PipelineWarning, Result};
use crate::features::FeatureFrame;
use crate::horizon::Horizon;
use risk_math::wilson_interval;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use tracing::info;

/// One reliability bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub positives: usize,
    pub mean_prediction: f64,
    pub mean_residual: f64,
}

/// Binned residuals of out-of-sample calibrated predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualProfile {
    bins: Vec<ResidualBin>,
    interval_level: f64,
    /// Two-sided standard normal quantile for `interval_level`
    z: f64,
}

impl ResidualProfile {
    /// Fit the profile on calibrated predictions and their outcomes
    ///
    /// The predictions must come from calibrators that did not see the
    /// corresponding rows; in-sample isotonic output has zero mean residual
    /// in every pooled block.
    pub fn fit(
        predictions: &[f64],
        labels: &[bool],
        n_bins: usize,
        interval_level: f64,
    ) -> Result<Self> {
        if n_bins == 0 || predictions.len() != labels.len() {
            return Err(PipelineError::Config(format!(
                "Cannot build a residual profile with {} bins from {} predictions and {} labels",
                n_bins,
                predictions.len(),
                labels.len()
            )));
        }
        if !(interval_level > 0.0 && interval_level < 1.0) {
            return Err(PipelineError::Config(format!(
                "forecast.interval_level must lie in (0, 1), got {}",
                interval_level
            )));
        }
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| PipelineError::Config(format!("Standard normal unavailable: {}", e)))?;
        let z = normal.inverse_cdf(0.5 + interval_level / 2.0);

        let width = 1.0 / n_bins as f64;
        let mut bins: Vec<ResidualBin> = (0..n_bins)
            .map(|i| ResidualBin {
                lower: i as f64 * width,
                upper: (i + 1) as f64 * width,
                count: 0,
                positives: 0,
                mean_prediction: 0.0,
                mean_residual: 0.0,
            })
            .collect();

        for (&p, &label) in predictions.iter().zip(labels) {
            let observed = if label { 1.0 } else { 0.0 };
            let bin = &mut bins[Self::bin_index(p, n_bins)];
            bin.count += 1;
            bin.positives += label as usize;
            let n = bin.count as f64;
            bin.mean_prediction += (p - bin.mean_prediction) / n;
            bin.mean_residual += (observed - p - bin.mean_residual) / n;
        }

        Ok(Self {
            bins,
            interval_level,
            z,
        })
    }

    fn bin_index(p: f64, n_bins: usize) -> usize {
        ((p.clamp(0.0, 1.0) * n_bins as f64) as usize).min(n_bins - 1)
    }

    /// Populated bin closest to the one holding `p`
    fn nearest_populated(&self, p: f64) -> Option<&ResidualBin> {
        if self.bins.is_empty() {
            return None;
        }
        let home = Self::bin_index(p, self.bins.len());
        (0..self.bins.len())
            .flat_map(|d| [home.checked_sub(d), Some(home + d)])
            .flatten()
            .filter_map(|i| self.bins.get(i))
            .find(|bin| bin.count > 0)
    }

    pub fn bins(&self) -> &[ResidualBin] {
        &self.bins
    }

    pub fn interval_level(&self) -> f64 {
        self.interval_level
    }

    /// Lower and upper bound for a calibrated probability
    ///
    /// Both bounds lie in `[0, 1]` and always bracket `p`. With no populated
    /// bin the interval is `[0, 1]`.
    pub fn interval(&self, p: f64) -> (f64, f64) {
        let p = p.clamp(0.0, 1.0);
        let Some(bin) = self.nearest_populated(p) else {
            return (0.0, 1.0);
        };
        let Ok((wilson_lo, wilson_hi)) = wilson_interval(bin.positives, bin.count, self.z) else {
            return (0.0, 1.0);
        };
        let rate = bin.positives as f64 / bin.count as f64;
        let centre = (p + bin.mean_residual).clamp(0.0, 1.0);

        let lo = (centre - (rate - wilson_lo)).clamp(0.0, 1.0).min(p);
        let hi = (centre + (wilson_hi - rate)).clamp(0.0, 1.0).max(p);
        (lo, hi)
    }
}

/// One row of the forecast table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub region: String,
    /// Latest observed period the forecast is made from
    pub anchor_period: Period,
    pub horizon: Horizon,
    pub probability: f64,
    pub probability_lo: f64,
    pub probability_hi: f64,
    pub risk_tier: RiskTier,
    pub model_version: String,
}

/// Inputs handed to the external explanation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationFacts {
    pub region: String,
    pub anchor_period: Period,
    pub horizon: Horizon,
    pub probability: f64,
    pub risk_tier: RiskTier,
    /// Raw signal values at the anchor; `None` where missing
    pub signals: BTreeMap<String, Option<f64>>,
}

/// Everything one forecast pass produces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastBatch {
    pub forecasts: Vec<Forecast>,
    pub facts: Vec<ExplanationFacts>,
    pub warnings: Vec<PipelineWarning>,
}

/// Applies trained artifacts to the latest period of every region
#[derive(Debug, Clone)]
pub struct ForecastGenerator {
    thresholds: ThresholdConfig,
}

impl ForecastGenerator {
    /// Create a new forecast generator
    pub fn new(thresholds: &ThresholdConfig) -> Self {
        Self {
            thresholds: thresholds.clone(),
        }
    }

    /// Forecast every region at every trained horizon
    ///
    /// Regions whose latest period has no feature row are skipped with an
    /// `InsufficientHistory` warning.
    pub fn generate(
        &self,
        panel: &Panel,
        frame: &FeatureFrame,
        artifacts: &[ModelArtifact],
    ) -> Result<ForecastBatch> {
        let mut batch = ForecastBatch::default();
        let mut artifacts: Vec<&ModelArtifact> = artifacts.iter().collect();
        artifacts.sort_by_key(|a| a.horizon);

        for artifact in &artifacts {
            if artifact.feature_names.as_slice() != frame.feature_names() {
                return Err(PipelineError::Schema(format!(
                    "Artifact {} expects features {:?}, frame has {:?}",
                    artifact.version,
                    artifact.feature_names,
                    frame.feature_names()
                )));
            }
        }

        for (region, observations) in panel.regions() {
            let Some(latest) = observations.last() else {
                continue;
            };
            let Some(row) = frame.get(region, latest.period) else {
                let warning = PipelineWarning::InsufficientHistory {
                    region: region.to_string(),
                    detail: format!(
                        "latest period {} has no feature row; region not forecast",
                        latest.period
                    ),
                };
                warning.log();
                batch.warnings.push(warning);
                continue;
            };

            let signals: BTreeMap<String, Option<f64>> = panel
                .signal_names()
                .iter()
                .zip(&latest.signals)
                .map(|(name, &value)| (name.clone(), Some(value).filter(|v| v.is_finite())))
                .collect();

            for artifact in &artifacts {
                let probability = artifact.predict(&row.values);
                let (probability_lo, probability_hi) = artifact.residuals.interval(probability);
                let risk_tier = self
                    .thresholds
                    .for_horizon(artifact.horizon)
                    .tier(probability);

                batch.forecasts.push(Forecast {
                    region: region.to_string(),
                    anchor_period: latest.period,
                    horizon: artifact.horizon,
                    probability,
                    probability_lo,
                    probability_hi,
                    risk_tier,
                    model_version: artifact.version.clone(),
                });
                batch.facts.push(ExplanationFacts {
                    region: region.to_string(),
                    anchor_period: latest.period,
                    horizon: artifact.horizon,
                    probability,
                    risk_tier,
                    signals: signals.clone(),
                });
            }
        }

        info!(
            "Generated {} forecasts for {} horizon(s)",
            batch.forecasts.len(),
            artifacts.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn profile() -> ResidualProfile {
        let predictions = vec![0.1, 0.1, 0.15, 0.5, 0.55, 0.9, 0.95];
        let labels = vec![false, false, true, true, false, true, true];
        ResidualProfile::fit(&predictions, &labels, 5, 0.9).unwrap()
    }

    #[test]
    fn test_profile_bins() {
        let profile = profile();
        let bins = profile.bins();
        assert_eq!(bins.len(), 5);
        assert_eq!(
            bins.iter().map(|b| b.count).collect::<Vec<_>>(),
            vec![3, 0, 2, 0, 2]
        );
        assert_eq!(bins[0].positives, 1);
        assert_relative_eq!(bins[0].mean_prediction, 0.35 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(
            bins[0].mean_residual,
            (0.0 - 0.1 + 0.0 - 0.1 + 1.0 - 0.15) / 3.0,
            epsilon = 1e-12
        );
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.05)]
    #[case(0.3)]
    #[case(0.5)]
    #[case(0.7)]
    #[case(0.97)]
    #[case(1.0)]
    fn test_interval_brackets_probability(#[case] p: f64) {
        let (lo, hi) = profile().interval(p);
        assert!(0.0 <= lo && lo <= p, "lo={} p={}", lo, p);
        assert!(p <= hi && hi <= 1.0, "hi={} p={}", hi, p);
        assert!(hi > lo, "degenerate interval at p={}", p);
    }

    #[test]
    fn test_interval_keeps_width_at_certainty() {
        let profile = profile();
        let (_, hi) = profile.interval(0.0);
        assert!(hi > 0.0);
        let (lo, _) = profile.interval(1.0);
        assert!(lo < 1.0);

        // A bin where every prediction and outcome is 1
        let certain = ResidualProfile::fit(&[1.0; 9], &[true; 9], 5, 0.9).unwrap();
        let (lo, hi) = certain.interval(1.0);
        assert_eq!(hi, 1.0);
        assert!(lo < 1.0);
    }

    #[test]
    fn test_interval_narrows_with_more_rows() {
        let sparse = ResidualProfile::fit(&[0.5], &[true], 5, 0.9).unwrap();
        let dense_predictions = vec![0.5; 100];
        let dense_labels: Vec<bool> = (0..100).map(|i| i % 2 == 0).collect();
        let dense = ResidualProfile::fit(&dense_predictions, &dense_labels, 5, 0.9).unwrap();

        let (slo, shi) = sparse.interval(0.5);
        let (dlo, dhi) = dense.interval(0.5);
        assert!(dhi - dlo < shi - slo);
        // Wilson bounds of 50/100 at z(0.9) = 1.645
        assert!((dhi - dlo - 0.16230).abs() < 1e-4);
    }

    #[test]
    fn test_empty_profile_spans_unit_interval() {
        let empty = ResidualProfile::fit(&[], &[], 5, 0.9).unwrap();
        assert_eq!(empty.interval(0.4), (0.0, 1.0));
        assert!(ResidualProfile::fit(&[0.5], &[true], 5, 1.0).is_err());
    }
}
