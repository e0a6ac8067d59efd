//! # Risk Forecast Workspace
//!
//! Umbrella crate re-exporting the workspace members:
//!
//! - [`risk_math`]: classification metrics, isotonic calibration and transforms
//! - [`risk_forecast`]: the validation, training and forecasting pipeline
//!
//! ## Example
//!
//! ```
//! use risk_forecast_workspace::risk_forecast::{Horizon, PipelineConfig, RiskTier};
//!
//! let config = PipelineConfig::default();
//! let thresholds = config.thresholds.for_horizon(Horizon::H1);
//! assert_eq!(thresholds.tier(0.75), RiskTier::High);
//! assert_eq!(thresholds.tier(0.40), RiskTier::Moderate);
//! ```

pub use risk_forecast;
pub use risk_math;
