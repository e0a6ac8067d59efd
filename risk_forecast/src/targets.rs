//! Per-horizon target derivation
//!
//! Targets are computed from the [`Panel`] alone and attached to a frozen
//! [`FeatureFrame`] afterwards; feature rows carry no outcome values.

use crate::config::TargetConfig;
use crate::data::{Observation, Panel, Period};
use crate::error::{PipelineError, Result};
use crate::features::FeatureFrame;
use crate::horizon::Horizon;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a horizon's labels come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSource {
    /// An explicit label column already aligned to `t + h`
    Explicit { column: String },
    /// The base outcome column read at `t + h`
    Shifted { column: String },
}

/// Labels for one horizon keyed by (region, period)
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSeries {
    horizon: Horizon,
    source: TargetSource,
    labels: BTreeMap<(String, Period), bool>,
}

impl TargetSeries {
    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    pub fn source(&self) -> &TargetSource {
        &self.source
    }

    /// Label of a region at an anchor period; `None` when undefined
    pub fn get(&self, region: &str, period: Period) -> Option<bool> {
        self.labels.get(&(region.to_string(), period)).copied()
    }

    /// Number of defined labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of positive labels
    pub fn positives(&self) -> usize {
        self.labels.values().filter(|&&y| y).count()
    }
}

/// Derives realized targets for each horizon
#[derive(Debug, Clone)]
pub struct TargetDeriver {
    config: TargetConfig,
}

impl TargetDeriver {
    /// Create a new target deriver
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Raw outcome for an observation under a source, if realized
    fn outcome(
        panel: &Panel,
        obs: &Observation,
        horizon: Horizon,
        source: &TargetSource,
    ) -> Option<f64> {
        // Either way the label only exists once period t + h has been observed
        let future = panel.find(&obs.region, obs.period.offset(horizon.periods() as i64))?;
        match source {
            TargetSource::Explicit { .. } => obs.outcomes.explicit(horizon),
            TargetSource::Shifted { .. } => future.outcomes.base,
        }
    }

    fn realized_count(panel: &Panel, horizon: Horizon, source: &TargetSource) -> usize {
        panel
            .regions()
            .flat_map(|(_, rows)| rows.iter())
            .filter(|obs| Self::outcome(panel, obs, horizon, source).is_some())
            .count()
    }

    /// Pick the label source for a horizon
    ///
    /// An explicit column wins when it holds at least one value; otherwise
    /// the base outcome is shifted. Fails with `MissingTarget` when neither
    /// yields a single realized target.
    pub fn source(&self, panel: &Panel, horizon: Horizon) -> Result<TargetSource> {
        let sources = panel.sources();
        let mut candidates = Vec::with_capacity(2);
        if let Some(column) = sources.explicit.get(&horizon) {
            candidates.push(TargetSource::Explicit {
                column: column.clone(),
            });
        }
        if let Some(column) = &sources.base {
            candidates.push(TargetSource::Shifted {
                column: column.clone(),
            });
        }
        if candidates.is_empty() {
            return Err(PipelineError::MissingTarget {
                horizon,
                reason: format!(
                    "neither '{}' nor base outcome column '{}' is present",
                    self.config.explicit_column(horizon),
                    self.config.base_column
                ),
            });
        }

        candidates
            .into_iter()
            .find(|source| Self::realized_count(panel, horizon, source) > 0)
            .ok_or_else(|| PipelineError::MissingTarget {
                horizon,
                reason: format!(
                    "no observation has a realized outcome {} period(s) ahead",
                    horizon
                ),
            })
    }

    /// Derive the target series for one horizon
    pub fn derive(&self, panel: &Panel, horizon: Horizon) -> Result<TargetSeries> {
        let source = self.source(panel, horizon)?;
        let threshold = self.config.positive_threshold;

        let labels = panel
            .regions()
            .flat_map(|(_, rows)| rows.iter())
            .filter_map(|obs| {
                Self::outcome(panel, obs, horizon, &source)
                    .map(|value| ((obs.region.clone(), obs.period), value >= threshold))
            })
            .collect();

        Ok(TargetSeries {
            horizon,
            source,
            labels,
        })
    }
}

/// Feature row joined with its label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRow {
    pub region: String,
    pub period: Period,
    pub features: Vec<f64>,
    pub label: bool,
}

/// Frozen features joined with one horizon's targets, sorted by (period, region)
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSet {
    horizon: Horizon,
    feature_names: Vec<String>,
    rows: Vec<LabeledRow>,
}

impl LabeledSet {
    /// Join rows that have both features and a defined label
    pub fn attach(frame: &FeatureFrame, targets: &TargetSeries) -> Self {
        let mut rows: Vec<LabeledRow> = frame
            .rows()
            .iter()
            .filter_map(|row| {
                targets.get(&row.region, row.period).map(|label| LabeledRow {
                    region: row.region.clone(),
                    period: row.period,
                    features: row.values.clone(),
                    label,
                })
            })
            .collect();
        rows.sort_by(|a, b| (a.period, &a.region).cmp(&(b.period, &b.region)));

        Self {
            horizon: targets.horizon(),
            feature_names: frame.feature_names().to_vec(),
            rows,
        }
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[LabeledRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unique anchor periods in ascending order
    pub fn periods(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self.rows.iter().map(|r| r.period).collect();
        periods.dedup();
        periods
    }

    /// Period in which a row's label is realized
    pub fn realization(&self, row: &LabeledRow) -> Period {
        row.period.offset(self.horizon.periods() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{OutcomeSources, Outcomes};
    use chrono::NaiveDate;

    fn obs(region: &str, year: i32, month: u32, base: Option<f64>, y_h1: Option<f64>) -> Observation {
        let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        Observation {
            region: region.to_string(),
            date,
            period: Period::from_date(date),
            signals: vec![0.0],
            outcomes: Outcomes {
                base,
                explicit: [y_h1, None, None],
            },
        }
    }

    fn panel(observations: Vec<Observation>, explicit_h1: bool) -> Panel {
        let mut sources = OutcomeSources {
            base: Some("risk_label".to_string()),
            explicit: BTreeMap::new(),
        };
        if explicit_h1 {
            sources.explicit.insert(Horizon::H1, "y_h1".to_string());
        }
        Panel::group(vec!["ndvi".to_string()], sources, observations)
    }

    #[test]
    fn test_shifted_target_matches_future_outcome() {
        let outcomes = [0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let observations = outcomes
            .iter()
            .enumerate()
            .map(|(i, &y)| obs("a", 2023, i as u32 + 1, Some(y), None))
            .collect();
        let panel = panel(observations, false);
        let deriver = TargetDeriver::new(&TargetConfig::default());

        for horizon in Horizon::ALL {
            let series = deriver.derive(&panel, horizon).unwrap();
            let h = horizon.periods() as usize;
            assert_eq!(series.len(), outcomes.len() - h);
            for t in 0..outcomes.len() {
                let period = Period::new(2023, t as u32 + 1).unwrap();
                let expected = outcomes.get(t + h).map(|&y| y >= 1.0);
                assert_eq!(series.get("a", period), expected);
            }
        }
    }

    #[test]
    fn test_calendar_gap_leaves_target_undefined() {
        // March is missing, so January has no h2 label
        let panel = panel(
            vec![
                obs("a", 2023, 1, Some(0.0), None),
                obs("a", 2023, 2, Some(1.0), None),
                obs("a", 2023, 4, Some(1.0), None),
            ],
            false,
        );
        let series = TargetDeriver::new(&TargetConfig::default())
            .derive(&panel, Horizon::H2)
            .unwrap();
        assert_eq!(series.get("a", Period::new(2023, 1).unwrap()), None);
        assert_eq!(series.get("a", Period::new(2023, 2).unwrap()), Some(true));
    }

    #[test]
    fn test_explicit_column_preferred() {
        let panel = panel(
            vec![
                obs("a", 2023, 1, Some(0.0), Some(1.0)),
                obs("a", 2023, 2, Some(0.0), None),
            ],
            true,
        );
        let deriver = TargetDeriver::new(&TargetConfig::default());
        let series = deriver.derive(&panel, Horizon::H1).unwrap();

        assert!(matches!(series.source(), TargetSource::Explicit { .. }));
        assert_eq!(series.get("a", Period::new(2023, 1).unwrap()), Some(true));
        assert_eq!(series.get("a", Period::new(2023, 2).unwrap()), None);
    }

    #[test]
    fn test_explicit_label_needs_observed_future() {
        // y_h1 is filled on every row, but nothing is observed after March
        let panel = panel(
            vec![
                obs("a", 2024, 1, None, Some(0.0)),
                obs("a", 2024, 2, None, Some(1.0)),
                obs("a", 2024, 3, None, Some(1.0)),
            ],
            true,
        );
        let series = TargetDeriver::new(&TargetConfig::default())
            .derive(&panel, Horizon::H1)
            .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.get("a", Period::new(2024, 2).unwrap()), Some(true));
        assert_eq!(series.get("a", Period::new(2024, 3).unwrap()), None);
    }

    #[test]
    fn test_missing_target() {
        let panel = panel(vec![obs("a", 2023, 1, Some(1.0), None)], false);
        let result = TargetDeriver::new(&TargetConfig::default()).derive(&panel, Horizon::H1);
        assert!(matches!(result, Err(PipelineError::MissingTarget { .. })));
    }
}
