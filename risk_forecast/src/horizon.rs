//! Canonical forecast horizon identifier
//!
//! Horizons are counted in periods ahead. Every external spelling
//! (`1`, `"1"`, `"h1"`, `"H1"`, `"1_month"`, `"1m"`) is normalised here, at
//! the boundary; the rest of the crate only sees [`Horizon`].

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of periods ahead a forecast targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Horizon(u8);

impl Horizon {
    /// Largest supported horizon
    pub const MAX: u8 = 3;

    pub const H1: Horizon = Horizon(1);
    pub const H2: Horizon = Horizon(2);
    pub const H3: Horizon = Horizon(3);

    /// Every supported horizon in ascending order
    pub const ALL: [Horizon; 3] = [Horizon::H1, Horizon::H2, Horizon::H3];

    /// Create a horizon, rejecting values outside 1..=3
    pub fn new(periods: u8) -> Result<Self> {
        if periods == 0 || periods > Self::MAX {
            return Err(PipelineError::Config(format!(
                "Horizon must be between 1 and {}, got {}",
                Self::MAX,
                periods
            )));
        }
        Ok(Self(periods))
    }

    /// Periods ahead as an integer
    pub fn periods(self) -> u8 {
        self.0
    }

    /// Configuration key, e.g. `h2`
    pub fn key(self) -> String {
        format!("h{}", self.0)
    }

    /// Name of the explicit per-horizon label column, e.g. `y_h2`
    pub fn label_column(self) -> String {
        format!("y_h{}", self.0)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Horizon {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        let digits = lower
            .strip_prefix('h')
            .or_else(|| lower.strip_suffix("_month"))
            .or_else(|| lower.strip_suffix("_months"))
            .or_else(|| lower.strip_suffix('m'))
            .unwrap_or(&lower);

        let periods: u8 = digits
            .parse()
            .map_err(|_| PipelineError::Config(format!("Unrecognised horizon '{}'", s)))?;
        Horizon::new(periods)
    }
}

impl Serialize for Horizon {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for Horizon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u8),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Horizon::new(n).map_err(serde::de::Error::custom),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
