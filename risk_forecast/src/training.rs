//! Rolling-origin training with isotonic calibration
//!
//! The labeled periods are cut into `n_folds` consecutive validation blocks
//! ending at the latest labeled period. Each fold trains on the periods
//! strictly before its block. Pooled out-of-fold predictions fit the
//! isotonic calibrator shipped with the artifact; the final model is refit on
//! every labeled row.
//!
//! Calibrated metrics and the residual profile behind the forecast bounds use
//! cross-fitted calibration instead: each fold's scores go through a
//! calibrator fitted on the other folds only.

use crate::artifact::ModelArtifact;
use crate::config::{ForecastConfig, PipelineConfig, TrainingConfig};
use crate::data::Period;
use crate::error::{PipelineError, PipelineWarning, Result};
use crate::forecast::ResidualProfile;
use crate::horizon::Horizon;
use crate::metrics::{ClassificationScores, FoldMetrics, HorizonMetrics};
use crate::models::{ModelFamily, ModelTrainer};
use crate::targets::LabeledSet;
use chrono::Utc;
use risk_math::IsotonicCalibrator;
use tracing::{debug, info};

/// Row partition of one fold, as indices into [`LabeledSet::rows`]
#[derive(Debug, Clone, PartialEq)]
pub struct FoldPlan {
    pub fold: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    /// Prefix rows removed by the embargo
    pub purged: usize,
    pub validation_start: Period,
    pub validation_end: Period,
}

/// Split a labeled set into rolling-origin folds
///
/// With `embargo` set, training rows whose label is realized at or after the
/// validation block start are purged. Fails with `InsufficientData` when any
/// partition holds fewer than `min_rows` rows.
pub fn rolling_origin_folds(
    set: &LabeledSet,
    n_folds: usize,
    min_rows: usize,
    embargo: bool,
) -> Result<Vec<FoldPlan>> {
    let horizon = set.horizon();
    let min_rows = min_rows.max(1);
    let periods = set.periods();
    let m = periods.len();
    let block = m / (n_folds + 1);
    if n_folds == 0 || block == 0 {
        return Err(PipelineError::InsufficientData {
            horizon,
            reason: format!(
                "{} labeled period(s) cannot form {} rolling-origin folds",
                m, n_folds
            ),
        });
    }

    let mut plans = Vec::with_capacity(n_folds);
    for fold in 0..n_folds {
        let start_idx = m - (n_folds - fold) * block;
        let validation_start = periods[start_idx];
        let validation_end = periods[start_idx + block - 1];

        let mut train = Vec::new();
        let mut validation = Vec::new();
        let mut purged = 0;
        for (idx, row) in set.rows().iter().enumerate() {
            if row.period < validation_start {
                if embargo && set.realization(row) >= validation_start {
                    purged += 1;
                } else {
                    train.push(idx);
                }
            } else if row.period <= validation_end {
                validation.push(idx);
            }
        }

        if train.len() < min_rows || validation.len() < min_rows {
            return Err(PipelineError::InsufficientData {
                horizon,
                reason: format!(
                    "fold {} has {} training and {} validation rows (minimum {})",
                    fold,
                    train.len(),
                    validation.len(),
                    min_rows
                ),
            });
        }

        plans.push(FoldPlan {
            fold,
            train,
            validation,
            purged,
            validation_start,
            validation_end,
        });
    }

    Ok(plans)
}

/// Trains one calibrated model per horizon
#[derive(Debug, Clone)]
pub struct RollingOriginTrainer {
    training: TrainingConfig,
    forecast: ForecastConfig,
    model: ModelTrainer,
}

impl RollingOriginTrainer {
    /// Create a trainer; the warning is set when the model family fell back
    pub fn new(config: &PipelineConfig) -> Result<(Self, Option<PipelineWarning>)> {
        let (model, warning) = ModelTrainer::from_config(&config.training)?;
        let trainer = Self {
            training: config.training.clone(),
            forecast: config.forecast.clone(),
            model,
        };
        Ok((trainer, warning))
    }

    /// Classifier family in use
    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }

    fn gather(set: &LabeledSet, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<bool>) {
        indices
            .iter()
            .map(|&i| {
                let row = &set.rows()[i];
                (row.features.clone(), row.label)
            })
            .unzip()
    }

    /// Train, evaluate and calibrate one horizon
    pub fn train(&self, set: &LabeledSet, run_id: &str) -> Result<ModelArtifact> {
        let horizon = set.horizon();
        let recall_fpr = self.training.recall_fpr;
        let plans = rolling_origin_folds(
            set,
            self.training.n_folds,
            self.training.min_fold_rows,
            self.training.embargo,
        )?;
        info!(
            "Horizon {}: {} labeled rows, {} folds, {}",
            horizon,
            set.len(),
            plans.len(),
            self.family()
        );

        let mut folds = Vec::with_capacity(plans.len());
        let mut fold_outputs = Vec::with_capacity(plans.len());
        for plan in &plans {
            let (x_train, y_train) = Self::gather(set, &plan.train);
            let (x_valid, y_valid) = Self::gather(set, &plan.validation);

            let model = self.model.fit(&x_train, &y_train)?;
            let scores = model.predict_all(&x_valid);
            let fold_scores = ClassificationScores::compute(&scores, &y_valid, recall_fpr)?;

            let rows = set.rows();
            let metrics = FoldMetrics {
                fold: plan.fold,
                train_rows: plan.train.len(),
                validation_rows: plan.validation.len(),
                purged_rows: plan.purged,
                train_start: rows[plan.train[0]].period,
                train_end: rows[plan.train[plan.train.len() - 1]].period,
                validation_start: plan.validation_start,
                validation_end: plan.validation_end,
                positive_rate: y_valid.iter().filter(|&&y| y).count() as f64
                    / y_valid.len() as f64,
                scores: fold_scores,
            };
            debug!(
                "Horizon {} fold {}: train {}..{} ({} rows, {} purged), validate {}..{} ({} rows), auc={:?} brier={:.4}",
                horizon,
                plan.fold,
                metrics.train_start,
                metrics.train_end,
                metrics.train_rows,
                metrics.purged_rows,
                metrics.validation_start,
                metrics.validation_end,
                metrics.validation_rows,
                metrics.scores.roc_auc,
                metrics.scores.brier
            );

            folds.push(metrics);
            fold_outputs.push((scores, y_valid));
        }

        let (oof_scores, oof_labels): (Vec<f64>, Vec<bool>) = fold_outputs
            .iter()
            .flat_map(|(scores, labels)| scores.iter().copied().zip(labels.iter().copied()))
            .unzip();
        let calibrator = IsotonicCalibrator::fit(&oof_scores, &oof_labels)?;
        let cross_fitted = cross_fit_calibration(&fold_outputs)?;

        let uncalibrated = ClassificationScores::compute(&oof_scores, &oof_labels, recall_fpr)?;
        let calibrated_scores =
            ClassificationScores::compute(&cross_fitted, &oof_labels, recall_fpr)?;
        let residuals = ResidualProfile::fit(
            &cross_fitted,
            &oof_labels,
            self.forecast.residual_bins,
            self.forecast.interval_level,
        )?;

        let all: Vec<usize> = (0..set.len()).collect();
        let (x_all, y_all) = Self::gather(set, &all);
        let model = self.model.fit(&x_all, &y_all)?;

        let metrics = HorizonMetrics {
            horizon,
            model_family: self.family(),
            labeled_rows: set.len(),
            labeled_periods: set.periods().len(),
            folds,
            recall_fpr,
            uncalibrated,
            calibrated: calibrated_scores,
        };
        info!(
            "Horizon {}: mean fold auc={:?}, pooled OOF auc={:?} brier {:.4} -> {:.4} after calibration",
            horizon,
            metrics.mean_fold_auc(),
            metrics.calibrated.roc_auc,
            metrics.uncalibrated.brier,
            metrics.calibrated.brier
        );

        Ok(ModelArtifact {
            version: model_version(run_id, horizon),
            horizon,
            feature_names: set.feature_names().to_vec(),
            family: self.family(),
            model,
            calibrator,
            residuals,
            random_state: self.training.random_state,
            trained_at: Utc::now(),
            training_rows: set.len(),
            metrics,
        })
    }
}

/// Calibrate each fold's scores with an isotonic fit on every other fold
///
/// Returns the calibrated scores concatenated in fold order. Needs at least
/// two folds.
pub fn cross_fit_calibration(folds: &[(Vec<f64>, Vec<bool>)]) -> Result<Vec<f64>> {
    if folds.len() < 2 {
        return Err(PipelineError::Config(format!(
            "Cross-fitted calibration needs at least 2 folds, got {}",
            folds.len()
        )));
    }

    let mut calibrated = Vec::with_capacity(folds.iter().map(|(s, _)| s.len()).sum());
    for (k, (scores, _)) in folds.iter().enumerate() {
        let (other_scores, other_labels): (Vec<f64>, Vec<bool>) = folds
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != k)
            .flat_map(|(_, (s, l))| s.iter().copied().zip(l.iter().copied()))
            .unzip();
        let calibrator = IsotonicCalibrator::fit(&other_scores, &other_labels)?;
        calibrated.extend(calibrator.transform_all(scores));
    }
    Ok(calibrated)
}

/// Version tag of a horizon's model within a run
pub fn model_version(run_id: &str, horizon: Horizon) -> String {
    format!("{}-{}", run_id, horizon.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observation, OutcomeSources, Outcomes, Panel};
    use crate::config::FeatureConfig;
    use crate::features::FeatureEngineer;
    use crate::targets::TargetDeriver;
    use chrono::NaiveDate;
    use rstest::rstest;

    /// Three regions whose outcome follows the previous month's signal
    fn labeled_set(periods: i64, horizon: Horizon) -> LabeledSet {
        let start = Period::new(2021, 1).unwrap();
        let mut observations = Vec::new();
        for (r, region) in ["a", "b", "c"].iter().enumerate() {
            for i in 0..periods {
                let period = start.offset(i);
                let signal = ((i * 7 + r as i64 * 3) % 10) as f64 / 10.0;
                observations.push(Observation {
                    region: region.to_string(),
                    date: NaiveDate::from_ymd_opt(period.year(), period.month(), 1).unwrap(),
                    period,
                    signals: vec![signal],
                    outcomes: Outcomes {
                        base: Some(if signal > 0.45 { 1.0 } else { 0.0 }),
                        explicit: [None, None, None],
                    },
                });
            }
        }
        let panel = Panel::group(
            vec!["x".to_string()],
            OutcomeSources {
                base: Some("risk_label".to_string()),
                explicit: Default::default(),
            },
            observations,
        );
        let frame = FeatureEngineer::new(&FeatureConfig {
            candidates: vec!["x".to_string()],
            lags: vec![1],
            seasonality: false,
            diffs: false,
        })
        .build(&panel)
        .unwrap();
        let targets = TargetDeriver::new(&Default::default())
            .derive(&panel, horizon)
            .unwrap();
        LabeledSet::attach(&frame, &targets)
    }

    #[rstest]
    #[case(Horizon::H1, true)]
    #[case(Horizon::H2, true)]
    #[case(Horizon::H3, false)]
    fn test_training_precedes_validation(#[case] horizon: Horizon, #[case] embargo: bool) {
        let set = labeled_set(24, horizon);
        let plans = rolling_origin_folds(&set, 3, 3, embargo).unwrap();
        assert_eq!(plans.len(), 3);

        for plan in &plans {
            let max_train = plan.train.iter().map(|&i| set.rows()[i].period).max().unwrap();
            let min_valid = plan
                .validation
                .iter()
                .map(|&i| set.rows()[i].period)
                .min()
                .unwrap();
            assert!(max_train < min_valid);
            assert_eq!(min_valid, plan.validation_start);
            if embargo {
                for &i in &plan.train {
                    assert!(set.realization(&set.rows()[i]) < plan.validation_start);
                }
            } else {
                assert_eq!(plan.purged, 0);
            }
        }

        // Blocks are consecutive and end at the latest labeled period
        let periods = set.periods();
        assert_eq!(plans[2].validation_end, *periods.last().unwrap());
        assert_eq!(plans[1].validation_end.offset(1), plans[2].validation_start);
    }

    #[test]
    fn test_insufficient_data() {
        let set = labeled_set(5, Horizon::H3);
        let result = rolling_origin_folds(&set, 3, 3, true);
        assert!(matches!(
            result,
            Err(PipelineError::InsufficientData { horizon, .. }) if horizon == Horizon::H3
        ));
    }

    #[test]
    fn test_train_produces_calibrated_artifact() {
        let set = labeled_set(24, Horizon::H1);
        let config = PipelineConfig {
            training: TrainingConfig {
                model_type: "logistic".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let (trainer, warning) = RollingOriginTrainer::new(&config).unwrap();
        assert!(warning.is_none());

        let artifact = trainer.train(&set, "run").unwrap();
        assert_eq!(artifact.version, "run-h1");
        assert_eq!(artifact.metrics.folds.len(), 3);
        assert_eq!(artifact.training_rows, set.len());
        assert!(artifact.metrics.calibrated.roc_auc.is_some());
        assert!(artifact.metrics.oof_rows() < set.len());
        for row in set.rows() {
            let p = artifact.predict(&row.features);
            assert!((0.0..=1.0).contains(&p));
            let (lo, hi) = artifact.residuals.interval(p);
            assert!(hi > lo, "interval collapsed at p={}", p);
        }

        let profiled: usize = artifact.residuals.bins().iter().map(|b| b.count).sum();
        assert_eq!(profiled, artifact.metrics.oof_rows());
    }

    #[test]
    fn test_each_fold_calibrated_without_its_own_rows() {
        let folds = vec![
            (vec![0.1, 0.2, 0.3, 0.4], vec![false, false, true, true]),
            (vec![0.15, 0.25, 0.35, 0.45], vec![false, true, false, true]),
            (vec![0.12, 0.22, 0.32, 0.42], vec![true, false, false, true]),
        ];
        let cross_fitted = cross_fit_calibration(&folds).unwrap();
        assert_eq!(cross_fitted.len(), 12);

        for k in 0..folds.len() {
            let (scores, labels): (Vec<f64>, Vec<bool>) = folds
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != k)
                .flat_map(|(_, (s, l))| s.iter().copied().zip(l.iter().copied()))
                .unzip();
            let expected = IsotonicCalibrator::fit(&scores, &labels)
                .unwrap()
                .transform_all(&folds[k].0);
            assert_eq!(&cross_fitted[k * 4..(k + 1) * 4], expected.as_slice());
        }

        assert!(cross_fit_calibration(&folds[..1]).is_err());
    }
}
