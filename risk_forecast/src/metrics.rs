//! Evaluation records for rolling-origin training

use crate::data::Period;
use crate::error::Result;
use crate::horizon::Horizon;
use crate::models::ModelFamily;
use risk_math::{brier_score, recall_at_fpr, roc_auc};
use serde::{Deserialize, Serialize};

/// Discrimination and calibration scores of one prediction set
///
/// Rank-based scores are `None` when only one class is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub roc_auc: Option<f64>,
    pub brier: f64,
    pub recall_at_fpr: Option<f64>,
}

impl ClassificationScores {
    /// Score probabilities against realized labels
    pub fn compute(probabilities: &[f64], labels: &[bool], max_fpr: f64) -> Result<Self> {
        let brier = brier_score(probabilities, labels)?;
        let both_classes = labels.iter().any(|&y| y) && labels.iter().any(|&y| !y);
        let (auc, recall) = if both_classes {
            (
                Some(roc_auc(probabilities, labels)?),
                Some(recall_at_fpr(probabilities, labels, max_fpr)?),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            roc_auc: auc,
            brier,
            recall_at_fpr: recall,
        })
    }
}

/// Metrics of one rolling-origin fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    /// Training rows removed because their label is realized in the validation block
    pub purged_rows: usize,
    pub train_start: Period,
    pub train_end: Period,
    pub validation_start: Period,
    pub validation_end: Period,
    pub positive_rate: f64,
    pub scores: ClassificationScores,
}

/// Per-horizon training report, stored next to the model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonMetrics {
    pub horizon: Horizon,
    pub model_family: ModelFamily,
    pub labeled_rows: usize,
    pub labeled_periods: usize,
    pub folds: Vec<FoldMetrics>,
    /// False-positive rate of the recall operating point
    pub recall_fpr: f64,
    /// Pooled out-of-fold scores before calibration
    pub uncalibrated: ClassificationScores,
    /// Pooled out-of-fold scores after cross-fitted isotonic calibration
    pub calibrated: ClassificationScores,
}

impl HorizonMetrics {
    /// Mean fold ROC-AUC over folds where it is defined
    pub fn mean_fold_auc(&self) -> Option<f64> {
        let aucs: Vec<f64> = self.folds.iter().filter_map(|f| f.scores.roc_auc).collect();
        if aucs.is_empty() {
            None
        } else {
            Some(aucs.iter().sum::<f64>() / aucs.len() as f64)
        }
    }

    /// Total out-of-fold rows
    pub fn oof_rows(&self) -> usize {
        self.folds.iter().map(|f| f.validation_rows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_class_scores() {
        let scores = ClassificationScores::compute(&[0.2, 0.4], &[false, false], 0.2).unwrap();
        assert_eq!(scores.roc_auc, None);
        assert_eq!(scores.recall_at_fpr, None);
        assert!((scores.brier - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_mean_fold_auc_skips_undefined_folds() {
        let fold = |fold: usize, auc: Option<f64>| FoldMetrics {
            fold,
            train_rows: 6,
            validation_rows: 3,
            purged_rows: 0,
            train_start: Period::new(2023, 1).unwrap(),
            train_end: Period::new(2023, 2).unwrap(),
            validation_start: Period::new(2023, 3).unwrap(),
            validation_end: Period::new(2023, 3).unwrap(),
            positive_rate: 0.5,
            scores: ClassificationScores {
                roc_auc: auc,
                brier: 0.2,
                recall_at_fpr: None,
            },
        };
        let pooled = ClassificationScores {
            roc_auc: None,
            brier: 0.2,
            recall_at_fpr: None,
        };
        let metrics = HorizonMetrics {
            horizon: Horizon::H1,
            model_family: ModelFamily::Logistic,
            labeled_rows: 15,
            labeled_periods: 5,
            folds: vec![fold(0, Some(0.6)), fold(1, None), fold(2, Some(0.8))],
            recall_fpr: 0.2,
            uncalibrated: pooled.clone(),
            calibrated: pooled,
        };
        assert!((metrics.mean_fold_auc().unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(metrics.oof_rows(), 9);
    }

    #[test]
    fn test_perfect_ranking() {
        let scores =
            ClassificationScores::compute(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true], 0.2)
                .unwrap();
        assert_eq!(scores.roc_auc, Some(1.0));
        assert_eq!(scores.recall_at_fpr, Some(1.0));
    }
}
