//! Model artifacts and the run manifest
//!
//! A run writes everything into `runs/<run_id>/` first and only then
//! publishes it by atomically replacing `manifest.json` at the output root.
//! Readers that start from the manifest never observe a half-written run.

use crate::error::{PipelineWarning, Result};
use crate::forecast::ResidualProfile;
use crate::horizon::Horizon;
use crate::metrics::HorizonMetrics;
use crate::models::{Classifier, FittedModel, ModelFamily};
use chrono::{DateTime, Utc};
use risk_math::IsotonicCalibrator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the published manifest at the output root
pub const MANIFEST_FILE: &str = "manifest.json";

/// Everything needed to reproduce one horizon's forecasts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub horizon: Horizon,
    /// Feature order the model was fitted on
    pub feature_names: Vec<String>,
    pub family: ModelFamily,
    pub model: FittedModel,
    pub calibrator: IsotonicCalibrator,
    pub residuals: ResidualProfile,
    pub random_state: u64,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub metrics: HorizonMetrics,
}

impl ModelArtifact {
    /// Calibrated probability for a feature row
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.calibrator
            .transform(self.model.predict_proba(features))
            .clamp(0.0, 1.0)
    }

    /// File name inside a run directory
    pub fn file_name(horizon: Horizon) -> String {
        format!("model_{}.json", horizon.key())
    }

    /// Metrics file name inside a run directory
    pub fn metrics_file_name(horizon: Horizon) -> String {
        format!("metrics_{}.json", horizon.key())
    }

    /// Write the artifact and its metrics into a run directory
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        write_json(&run_dir.join(Self::file_name(self.horizon)), self)?;
        write_json(
            &run_dir.join(Self::metrics_file_name(self.horizon)),
            &self.metrics,
        )?;
        Ok(())
    }

    /// Load an artifact from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

/// Manifest entry for one trained horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub horizon: Horizon,
    pub version: String,
    pub family: ModelFamily,
    /// Paths relative to the output root
    pub artifact: String,
    pub metrics: String,
}

/// Index of a published run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub run_dir: String,
    pub horizons: Vec<ManifestEntry>,
    /// Horizons that could not be trained, with the reason
    pub failed_horizons: BTreeMap<Horizon, String>,
    pub forecasts: String,
    pub summary: String,
    pub facts: String,
    pub warning_count: usize,
    pub warnings: Vec<PipelineWarning>,
}

impl ArtifactManifest {
    /// Run directory for a run id below an output root
    pub fn run_dir(root: &Path, run_id: &str) -> PathBuf {
        root.join("runs").join(run_id)
    }

    /// Relative path of a file inside a run directory
    pub fn relative(run_id: &str, file: &str) -> String {
        format!("runs/{}/{}", run_id, file)
    }

    /// Atomically replace the manifest at the output root
    pub fn publish(&self, root: &Path) -> Result<PathBuf> {
        let target = root.join(MANIFEST_FILE);
        let staging = root.join(format!("{}.tmp", MANIFEST_FILE));
        write_json(&staging, self)?;
        fs::rename(&staging, &target)?;
        info!("Published run {} to {}", self.run_id, target.display());
        Ok(target)
    }

    /// Load the currently published manifest
    pub fn load(root: &Path) -> Result<Self> {
        let content = fs::read_to_string(root.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the artifact for one horizon of this run
    pub fn artifact(&self, root: &Path, horizon: Horizon) -> Result<Option<ModelArtifact>> {
        match self.horizons.iter().find(|e| e.horizon == horizon) {
            Some(entry) => Ok(Some(ModelArtifact::load(root.join(&entry.artifact))?)),
            None => Ok(None),
        }
    }
}
