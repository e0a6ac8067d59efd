//! L2-regularised logistic regression on standardised features

use super::{base_rate, Classifier};
use crate::config::LogisticParams;
use crate::error::Result;
use risk_math::{logit, sigmoid, StandardScaler};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fitted logistic regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    scaler: StandardScaler,
    weights: Vec<f64>,
    intercept: f64,
    iterations: usize,
}

impl LogisticModel {
    /// Fit by full-batch gradient descent
    ///
    /// Minimises mean log-loss plus `l2 / (2n) * |w|^2`; the intercept is
    /// not penalised.
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &LogisticParams) -> Result<Self> {
        let scaler = StandardScaler::fit(rows)?;
        let x: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| scaler.transform(row))
            .collect::<std::result::Result<_, _>>()?;
        let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let n = x.len() as f64;
        let width = scaler.width();
        let mut weights = vec![0.0; width];
        let mut intercept = logit(base_rate(labels));
        let mut iterations = 0;

        for _ in 0..params.max_iter {
            iterations += 1;
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for (row, target) in x.iter().zip(&y) {
                let z = intercept + dot(&weights, row);
                let err = sigmoid(z) - target;
                grad_b += err;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
            }
            for (g, w) in grad_w.iter_mut().zip(&weights) {
                *g = *g / n + params.l2 * w / n;
            }
            grad_b /= n;

            let largest = grad_w.iter().fold(grad_b.abs(), |acc, g| acc.max(g.abs()));
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= params.learning_rate * g;
            }
            intercept -= params.learning_rate * grad_b;

            if largest < params.tolerance {
                break;
            }
        }
        debug!("Logistic regression converged after {} iterations", iterations);

        Ok(Self {
            scaler,
            weights,
            intercept,
            iterations,
        })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(
            features.len(),
            self.weights.len(),
            "feature width does not match the fitted model"
        );
        match self.scaler.transform(features) {
            Ok(row) => sigmoid(self.intercept + dot(&self.weights, &row)),
            Err(err) => {
                warn!("Logistic model scored with the intercept only: {}", err);
                sigmoid(self.intercept)
            }
        }
    }
}
