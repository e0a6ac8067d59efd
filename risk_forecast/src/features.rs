//! Feature engineering over the region/period panel
//!
//! Every feature of a row at period `t` depends only on observations of the
//! same region at periods `<= t`. Regions are processed in parallel.

use crate::config::FeatureConfig;
use crate::data::{Observation, Panel, Period};
use crate::error::{PipelineWarning, Result};
use rayon::prelude::*;
use risk_math::cyclical_month;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Engineered features of one region at one period
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub region: String,
    pub period: Period,
    /// Aligned with [`FeatureFrame::feature_names`]
    pub values: Vec<f64>,
}

/// Frozen feature table, sorted by (region, period)
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    feature_names: Vec<String>,
    rows: Vec<FeatureRow>,
    /// Rows dropped per region for lack of history
    dropped: BTreeMap<String, usize>,
}

impl FeatureFrame {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Feature row of a region at a period
    pub fn get(&self, region: &str, period: Period) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by(|row| (row.region.as_str(), row.period).cmp(&(region, period)))
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Rows dropped per region for lack of history
    pub fn dropped(&self) -> &BTreeMap<String, usize> {
        &self.dropped
    }

    /// One warning per region that lost rows
    pub fn warnings(&self) -> Vec<PipelineWarning> {
        self.dropped
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(region, count)| PipelineWarning::InsufficientHistory {
                region: region.clone(),
                detail: format!("{} period(s) dropped for missing lag history", count),
            })
            .collect()
    }
}

/// Builds lag, difference and seasonality features
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    /// Create a new feature engineer
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Ordered feature names for a set of signals
    pub fn feature_names(&self, signals: &[String]) -> Vec<String> {
        let mut names: Vec<String> = signals.to_vec();
        for lag in &self.config.lags {
            names.extend(signals.iter().map(|s| format!("{}_lag{}", s, lag)));
        }
        if self.config.diffs {
            names.extend(signals.iter().map(|s| format!("{}_diff1", s)));
        }
        if self.config.seasonality {
            names.push("month_sin".to_string());
            names.push("month_cos".to_string());
        }
        names
    }

    /// Build the feature frame for the whole panel
    pub fn build(&self, panel: &Panel) -> Result<FeatureFrame> {
        let regions: Vec<(&str, &[Observation])> = panel.regions().collect();

        let per_region = regions
            .par_iter()
            .map(|(region, rows)| self.region_rows(panel, region, rows))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(panel.len());
        let mut dropped = BTreeMap::new();
        for ((region, _), (region_rows, lost)) in regions.iter().zip(per_region) {
            debug!("Region {}: {} feature rows, {} dropped", region, region_rows.len(), lost);
            rows.extend(region_rows);
            dropped.insert(region.to_string(), lost);
        }

        let frame = FeatureFrame {
            feature_names: self.feature_names(panel.signal_names()),
            rows,
            dropped,
        };
        info!(
            "Built {} feature rows with {} features",
            frame.len(),
            frame.feature_names.len()
        );
        Ok(frame)
    }

    /// Feature rows of one region and the number of rows dropped
    fn region_rows(
        &self,
        panel: &Panel,
        region: &str,
        observations: &[Observation],
    ) -> Result<(Vec<FeatureRow>, usize)> {
        let mut rows = Vec::with_capacity(observations.len());
        let mut dropped = 0;

        for obs in observations {
            let history = |k: usize| panel.find(region, obs.period.offset(-(k as i64)));

            let lagged: Option<Vec<&Observation>> =
                self.config.lags.iter().map(|&k| history(k)).collect();
            let previous = if self.config.diffs { history(1) } else { None };
            let (lagged, previous) = match (lagged, previous, self.config.diffs) {
                (Some(lagged), previous, false) => (lagged, previous),
                (Some(lagged), Some(previous), true) => (lagged, Some(previous)),
                _ => {
                    dropped += 1;
                    continue;
                }
            };

            let mut values = obs.signals.clone();
            for past in &lagged {
                values.extend_from_slice(&past.signals);
            }
            if let Some(previous) = previous {
                values.extend(
                    obs.signals
                        .iter()
                        .zip(&previous.signals)
                        .map(|(now, before)| now - before),
                );
            }
            if self.config.seasonality {
                let (sin, cos) = cyclical_month(obs.period.month())?;
                values.push(sin);
                values.push(cos);
            }

            rows.push(FeatureRow {
                region: region.to_string(),
                period: obs.period,
                values,
            });
        }

        Ok((rows, dropped))
    }
}
