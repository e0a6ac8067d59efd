//! Gradient boosting backed by the `gbdt` crate
//!
//! This module wraps `gbdt::gradient_boost::GBDT` trained with its
//! log-likelihood loss (labels encoded as `-1` / `+1`). The library samples
//! rows with an unseeded generator, so its own sample ratio is pinned to 1.0
//! and `subsample` is applied once here with the run's `random_state`.

use super::{base_rate, Classifier};
use crate::config::GbmParams;
use crate::error::Result;
use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use risk_math::MathError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const LOSS: &str = "LogLikelyhood";

/// Fitted booster, or the base rate when the training labels hold one class
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Booster {
    Trees(Arc<GBDT>),
    Constant(f64),
}

/// Boosted tree classifier
#[derive(Clone, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    n_features: usize,
    n_estimators: usize,
    booster: Booster,
}

impl fmt::Debug for GradientBoostedTrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let booster = match &self.booster {
            Booster::Trees(_) => "trees".to_string(),
            Booster::Constant(p) => format!("constant({})", p),
        };
        f.debug_struct("GradientBoostedTrees")
            .field("n_features", &self.n_features)
            .field("n_estimators", &self.n_estimators)
            .field("booster", &booster)
            .finish()
    }
}

fn config(params: &GbmParams, n_features: usize) -> Config {
    let mut cfg = Config::new();
    cfg.set_feature_size(n_features);
    cfg.set_max_depth(params.max_depth as u32);
    cfg.set_iterations(params.n_estimators);
    cfg.set_shrinkage(params.learning_rate as f32);
    cfg.set_min_leaf_size(params.min_samples_leaf.max(1));
    cfg.set_loss(LOSS);
    cfg.set_data_sample_ratio(1.0);
    cfg.set_feature_sample_ratio(1.0);
    cfg.set_training_optimization_level(2);
    cfg.set_debug(false);
    cfg
}

fn test_row(row: &[f64]) -> Data {
    Data::new_test_data(row.iter().map(|&v| v as f32).collect(), None)
}

impl GradientBoostedTrees {
    /// Fit the ensemble
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &GbmParams, seed: u64) -> Result<Self> {
        let n = rows.len();
        if n == 0 || n != labels.len() {
            return Err(MathError::InsufficientData(format!(
                "Cannot boost on {} rows with {} labels",
                n,
                labels.len()
            ))
            .into());
        }
        let n_features = rows[0].len();
        if rows.iter().any(|r| r.len() != n_features) {
            return Err(MathError::InvalidInput("Ragged feature rows".to_string()).into());
        }

        let positives = labels.iter().filter(|&&y| y).count();
        if positives == 0 || positives == n {
            debug!("Single-class training labels, boosting reduced to the base rate");
            return Ok(Self {
                n_features,
                n_estimators: 0,
                booster: Booster::Constant(base_rate(labels)),
            });
        }

        let sample_size = ((params.subsample * n as f64).round() as usize).clamp(1, n);
        let samples: Vec<usize> = if sample_size < n {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = index::sample(&mut rng, n, sample_size).into_vec();
            picked.sort_unstable();
            picked
        } else {
            (0..n).collect()
        };

        let mut training: DataVec = samples
            .iter()
            .map(|&i| {
                let label = if labels[i] { 1.0 } else { -1.0 };
                let features = rows[i].iter().map(|&v| v as f32).collect();
                Data::new_training_data(features, 1.0, label, None)
            })
            .collect();

        let mut model = GBDT::new(&config(params, n_features));
        model.fit(&mut training);
        info!(
            "Fitted {} boosting rounds on {} rows x {} features",
            params.n_estimators,
            training.len(),
            n_features
        );

        Ok(Self {
            n_features,
            n_estimators: params.n_estimators,
            booster: Booster::Trees(Arc::new(model)),
        })
    }

    /// Score many rows in one library call
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        match &self.booster {
            Booster::Constant(p) => vec![*p; rows.len()],
            Booster::Trees(model) => {
                let data: DataVec = rows.iter().map(|r| test_row(r)).collect();
                model
                    .predict(&data)
                    .into_iter()
                    .map(|p| (p as f64).clamp(0.0, 1.0))
                    .collect()
            }
        }
    }

    /// Number of boosting rounds; zero for a constant model
    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

impl Classifier for GradientBoostedTrees {
    fn predict_proba(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.n_features);
        match &self.booster {
            Booster::Constant(p) => *p,
            Booster::Trees(model) => model
                .predict(&vec![test_row(features)])
                .first()
                .map(|&p| (p as f64).clamp(0.0, 1.0))
                .unwrap_or(0.5),
        }
    }
}
