//! Feature and score transforms
//!
//! Contains:
//! - Standard scaling of feature matrices
//! - The logistic link and its inverse
//! - Cyclical (sine/cosine) encoding of month-of-year

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Numerically stable logistic function
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-odds of a probability, clamped away from 0 and 1
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

/// Sine and cosine of the month angle `2π · month / 12`
pub fn cyclical_month(month: u32) -> Result<(f64, f64)> {
    if !(1..=12).contains(&month) {
        return Err(MathError::InvalidInput(format!(
            "Month must be between 1 and 12, got {}",
            month
        )));
    }
    let angle = 2.0 * PI * month as f64 / 12.0;
    Ok((angle.sin(), angle.cos()))
}

/// Column-wise standardisation to zero mean and unit variance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let first = rows.first().ok_or_else(|| {
            MathError::InsufficientData("Cannot fit a scaler on zero rows".to_string())
        })?;
        let width = first.len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(MathError::InvalidInput(
                "All rows must have the same number of columns".to_string(),
            ));
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row.iter()) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut scales = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row.iter()).zip(means.iter()) {
                *s += (v - m).powi(2);
            }
        }
        // Constant columns keep unit scale
        scales.iter_mut().for_each(|s| {
            let std = (*s / n).sqrt();
            *s = if std > 1e-12 { std } else { 1.0 };
        });

        Ok(Self { means, scales })
    }

    /// Number of columns the scaler was fitted on
    pub fn width(&self) -> usize {
        self.means.len()
    }

    /// Standardise one row
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.means.len() {
            return Err(MathError::InvalidInput(format!(
                "Expected {} columns, got {}",
                self.means.len(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(self.scales.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}
