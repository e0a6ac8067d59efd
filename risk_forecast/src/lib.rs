//! # Risk Forecast
//!
//! Multi-horizon regional risk forecasting from monthly panel data.
//!
//! ## Features
//!
//! - Panel loading from CSV, Parquet or a polars `DataFrame` with column alias resolution
//! - Dataset validation (schema, duplicate keys, time order, target availability)
//! - Lag, difference and seasonality features that never look past their period
//! - Per-horizon targets derived from explicit labels or a shifted base outcome
//! - Rolling-origin training with an optional embargo, isotonic calibration and
//!   gradient boosting (logistic regression as fallback)
//! - Low / Moderate / High categorisation with per-horizon thresholds
//! - Forecasts with uncertainty bounds, published behind an atomic manifest
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use risk_forecast::{DataLoader, Pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load("pipeline.toml")?;
//!     let pipeline = Pipeline::new(config)?;
//!
//!     let table = DataLoader::from_csv("panel.csv")?;
//!     let manifest = pipeline.run_and_publish(&table, Path::new("out"))?;
//!     println!("published run {} with {} horizon(s)", manifest.run_id, manifest.horizons.len());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod categorize;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod forecast;
pub mod horizon;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod targets;
pub mod training;
pub mod validate;

// Re-export commonly used types
pub use crate::artifact::{ArtifactManifest, ModelArtifact};
pub use crate::categorize::{categorize, summarize, RiskThresholds, RiskTier};
pub use crate::config::PipelineConfig;
pub use crate::data::{DataLoader, Panel, PanelTable, Period};
pub use crate::error::{PipelineError, PipelineWarning, Result};
pub use crate::features::{FeatureEngineer, FeatureFrame};
pub use crate::forecast::{Forecast, ForecastGenerator};
pub use crate::horizon::Horizon;
pub use crate::models::ModelFamily;
pub use crate::pipeline::{Pipeline, RunOutput};
pub use crate::targets::{LabeledSet, TargetDeriver};
pub use crate::training::RollingOriginTrainer;
pub use crate::validate::DatasetValidator;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
