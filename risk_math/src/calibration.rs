//! Isotonic probability calibration
//!
//! Maps raw classifier scores onto observed outcome frequencies with a
//! non-decreasing step function fitted by pool-adjacent-violators (PAV).
//! Predictions between fitted points are linearly interpolated and clipped
//! at both ends.

use crate::{check_lengths, MathError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One knot of the fitted calibration curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Weighted mean raw score of the pooled block
    pub score: f64,
    /// Observed positive frequency of the pooled block
    pub probability: f64,
}

/// Fitted isotonic calibration map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    points: Vec<CalibrationPoint>,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    score_sum: f64,
    label_sum: f64,
    weight: f64,
}

impl Block {
    fn value(&self) -> f64 {
        self.label_sum / self.weight
    }

    fn merge(&mut self, other: Block) {
        self.score_sum += other.score_sum;
        self.label_sum += other.label_sum;
        self.weight += other.weight;
    }
}

impl IsotonicCalibrator {
    /// Fit the calibration curve on held-out scores and their realized outcomes
    pub fn fit(scores: &[f64], labels: &[bool]) -> Result<Self> {
        check_lengths(scores, labels)?;

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

        // Equal scores start in the same block
        let mut blocks: Vec<Block> = Vec::new();
        let mut last_score: Option<f64> = None;
        for idx in order {
            let y = if labels[idx] { 1.0 } else { 0.0 };
            let block = Block {
                score_sum: scores[idx],
                label_sum: y,
                weight: 1.0,
            };
            match (last_score, blocks.last_mut()) {
                (Some(prev), Some(current)) if prev == scores[idx] => current.merge(block),
                _ => blocks.push(block),
            }
            last_score = Some(scores[idx]);
        }

        // Pool adjacent violators
        let mut pooled: Vec<Block> = Vec::with_capacity(blocks.len());
        for block in blocks {
            pooled.push(block);
            while pooled.len() > 1 {
                let n = pooled.len();
                if pooled[n - 2].value() <= pooled[n - 1].value() {
                    break;
                }
                let last = pooled.pop().ok_or_else(|| {
                    MathError::CalculationError("PAV stack unexpectedly empty".to_string())
                })?;
                if let Some(prev) = pooled.last_mut() {
                    prev.merge(last);
                }
            }
        }

        let points = pooled
            .iter()
            .map(|b| CalibrationPoint {
                score: b.score_sum / b.weight,
                probability: b.value(),
            })
            .collect();

        Ok(Self { points })
    }

    /// Fitted knots in ascending score order
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Calibrated probability for a raw score
    pub fn transform(&self, score: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return score.clamp(0.0, 1.0),
        };

        if score <= first.score {
            return first.probability;
        }
        if score >= last.score {
            return last.probability;
        }

        // First knot strictly above the score
        let upper = self.points.partition_point(|p| p.score <= score);
        let hi = &self.points[upper];
        let lo = &self.points[upper - 1];
        let span = hi.score - lo.score;
        if span <= f64::EPSILON {
            return hi.probability;
        }
        let weight = (score - lo.score) / span;
        (lo.probability + weight * (hi.probability - lo.probability)).clamp(0.0, 1.0)
    }

    /// Calibrate a batch of raw scores
    pub fn transform_all(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|&s| self.transform(s)).collect()
    }
}
