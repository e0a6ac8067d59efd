//! Risk tier categorisation
//!
//! Maps a calibrated probability onto Low / Moderate / High using cut points
//! configured independently for every horizon.

use crate::config::ThresholdConfig;
use crate::error::{PipelineError, Result};
use crate::forecast::Forecast;
use crate::horizon::Horizon;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discrete risk category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Moderate,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskTier::Low => "Low",
            RiskTier::Moderate => "Moderate",
            RiskTier::High => "High",
        };
        f.write_str(label)
    }
}

/// Cut points for one horizon; `red` starts High, `yellow` starts Moderate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub red: f64,
    pub yellow: f64,
}

impl RiskThresholds {
    /// Create thresholds, rejecting anything but `0 <= yellow < red <= 1`
    pub fn new(horizon: Horizon, red: f64, yellow: f64) -> Result<Self> {
        let thresholds = Self { red, yellow };
        thresholds.validate(horizon)?;
        Ok(thresholds)
    }

    pub(crate) const fn new_unchecked(red: f64, yellow: f64) -> Self {
        Self { red, yellow }
    }

    /// Check the ordering constraint
    pub fn validate(&self, horizon: Horizon) -> Result<()> {
        let ordered = self.yellow >= 0.0 && self.red > self.yellow && self.red <= 1.0;
        if !ordered {
            return Err(PipelineError::InvalidThresholds {
                horizon,
                red: self.red,
                yellow: self.yellow,
            });
        }
        Ok(())
    }

    /// Tier for a calibrated probability
    pub fn tier(&self, probability: f64) -> RiskTier {
        if probability >= self.red {
            RiskTier::High
        } else if probability >= self.yellow {
            RiskTier::Moderate
        } else {
            RiskTier::Low
        }
    }
}

/// Tier for a probability at a horizon under validated thresholds
pub fn categorize(thresholds: &ThresholdConfig, horizon: Horizon, probability: f64) -> RiskTier {
    thresholds.for_horizon(horizon).tier(probability)
}

/// Aggregate over a group of forecasts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSummary {
    pub count: usize,
    pub mean_probability: f64,
    pub max_tier: Option<RiskTier>,
    pub distribution: BTreeMap<RiskTier, usize>,
}

impl TierSummary {
    fn add(&mut self, forecast: &Forecast) {
        // Running mean
        self.count += 1;
        self.mean_probability += (forecast.probability - self.mean_probability) / self.count as f64;
        self.max_tier = self.max_tier.max(Some(forecast.risk_tier));
        *self.distribution.entry(forecast.risk_tier).or_insert(0) += 1;
    }
}

/// Forecast table rolled up by horizon and by region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub total: usize,
    pub by_horizon: BTreeMap<Horizon, TierSummary>,
    pub by_region: BTreeMap<String, TierSummary>,
}

/// Summarise a forecast table
pub fn summarize(forecasts: &[Forecast]) -> ForecastSummary {
    let mut summary = ForecastSummary {
        total: forecasts.len(),
        ..Default::default()
    };

    for forecast in forecasts {
        summary
            .by_horizon
            .entry(forecast.horizon)
            .or_default()
            .add(forecast);
        summary
            .by_region
            .entry(forecast.region.clone())
            .or_default()
            .add(forecast);
    }

    summary
}
