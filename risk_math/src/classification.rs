//! Binary classification metrics
//!
//! Contains the evaluation measures used for probabilistic risk classifiers:
//! - ROC-AUC (discrimination)
//! - Brier score (calibration)
//! - Recall at a fixed false-positive-rate operating point
//! - Wilson score bounds for an observed event rate

use crate::{check_lengths, MathError, Result};
use std::cmp::Ordering;

/// Count positives and negatives, failing when either class is absent
fn class_counts(labels: &[bool]) -> Result<(usize, usize)> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(MathError::InsufficientData(format!(
            "Both classes are required (positives: {}, negatives: {})",
            positives, negatives
        )));
    }
    Ok((positives, negatives))
}

/// Area under the ROC curve using the rank-sum formulation
///
/// Tied scores receive their average rank, so a constant scorer yields 0.5.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Result<f64> {
    check_lengths(scores, labels)?;
    let (positives, negatives) = class_counts(labels)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    // Average ranks (1-based) across runs of tied scores
    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg_rank;
        }
        start = end;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(labels.iter())
        .filter(|(_, &l)| l)
        .map(|(r, _)| *r)
        .sum();

    let p = positives as f64;
    let n = negatives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Mean squared difference between predicted probability and outcome
pub fn brier_score(probabilities: &[f64], labels: &[bool]) -> Result<f64> {
    check_lengths(probabilities, labels)?;
    if probabilities.iter().any(|p| !(0.0..=1.0).contains(p)) {
        return Err(MathError::InvalidInput(
            "Probabilities must lie in [0, 1]".to_string(),
        ));
    }

    let sum: f64 = probabilities
        .iter()
        .zip(labels.iter())
        .map(|(&p, &l)| {
            let y = if l { 1.0 } else { 0.0 };
            (p - y).powi(2)
        })
        .sum();

    Ok(sum / probabilities.len() as f64)
}

/// Best recall achievable while keeping the false-positive rate at or below `max_fpr`
///
/// Thresholds are only placed between distinct scores, so tied scores are
/// always classified together.
pub fn recall_at_fpr(scores: &[f64], labels: &[bool], max_fpr: f64) -> Result<f64> {
    check_lengths(scores, labels)?;
    if !(0.0..=1.0).contains(&max_fpr) {
        return Err(MathError::InvalidInput(format!(
            "False-positive rate must lie in [0, 1], got {}",
            max_fpr
        )));
    }
    let (positives, negatives) = class_counts(labels)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let mut true_pos = 0usize;
    let mut false_pos = 0usize;
    let mut best_recall = 0.0;

    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            if labels[order[end]] {
                true_pos += 1;
            } else {
                false_pos += 1;
            }
            end += 1;
        }

        let fpr = false_pos as f64 / negatives as f64;
        if fpr <= max_fpr {
            best_recall = true_pos as f64 / positives as f64;
        } else {
            break;
        }
        start = end;
    }

    Ok(best_recall)
}

/// Wilson score interval for `successes` events out of `trials`
///
/// `z` is the two-sided standard normal quantile. Unlike the normal
/// approximation the interval keeps a positive width at rates of 0 and 1.
pub fn wilson_interval(successes: usize, trials: usize, z: f64) -> Result<(f64, f64)> {
    if trials == 0 || successes > trials {
        return Err(MathError::InvalidInput(format!(
            "Wilson interval needs 0 <= successes <= trials and trials > 0, got {}/{}",
            successes, trials
        )));
    }
    if !(z.is_finite() && z > 0.0) {
        return Err(MathError::InvalidInput(format!(
            "Quantile must be positive, got {}",
            z
        )));
    }

    let n = trials as f64;
    let rate = successes as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let centre = (rate + z2 / (2.0 * n)) / denom;
    let half = z * (rate * (1.0 - rate) / n + z2 / (4.0 * n * n)).sqrt() / denom;

    Ok(((centre - half).clamp(0.0, 1.0), (centre + half).clamp(0.0, 1.0)))
}
