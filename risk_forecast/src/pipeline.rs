//! End-to-end pipeline run
//!
//! A [`Pipeline`] owns the run context: the validated configuration, the run
//! id, the resolved trainer and the warnings collected so far. [`Pipeline::run`]
//! is pure computation; nothing touches the filesystem until
//! [`RunOutput::publish`] is called on a finished run.

use crate::artifact::{write_json, ArtifactManifest, ManifestEntry, ModelArtifact};
use crate::categorize::{summarize, ForecastSummary};
use crate::config::PipelineConfig;
use crate::data::PanelTable;
use crate::error::{PipelineError, PipelineWarning, Result};
use crate::features::FeatureEngineer;
use crate::forecast::{ExplanationFacts, Forecast, ForecastGenerator};
use crate::horizon::Horizon;
use crate::models::ModelFamily;
use crate::targets::{LabeledSet, TargetDeriver};
use crate::training::RollingOriginTrainer;
use crate::validate::{DatasetValidator, ValidatedDataset, ValidationReport};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Output file names inside a run directory
pub const FORECASTS_FILE: &str = "forecasts.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const FACTS_FILE: &str = "facts.json";

/// Results of a completed run, not yet written anywhere
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub report: ValidationReport,
    pub artifacts: Vec<ModelArtifact>,
    pub failed_horizons: BTreeMap<Horizon, String>,
    pub forecasts: Vec<Forecast>,
    pub facts: Vec<ExplanationFacts>,
    pub summary: ForecastSummary,
    pub warnings: Vec<PipelineWarning>,
}

impl RunOutput {
    /// Write the run directory, then atomically publish its manifest
    pub fn publish(&self, root: &Path) -> Result<ArtifactManifest> {
        let run_dir = ArtifactManifest::run_dir(root, &self.run_id);
        fs::create_dir_all(&run_dir)?;

        let mut horizons = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            artifact.save(&run_dir)?;
            horizons.push(ManifestEntry {
                horizon: artifact.horizon,
                version: artifact.version.clone(),
                family: artifact.family,
                artifact: ArtifactManifest::relative(
                    &self.run_id,
                    &ModelArtifact::file_name(artifact.horizon),
                ),
                metrics: ArtifactManifest::relative(
                    &self.run_id,
                    &ModelArtifact::metrics_file_name(artifact.horizon),
                ),
            });
        }

        let mut writer = csv::Writer::from_path(run_dir.join(FORECASTS_FILE))?;
        for forecast in &self.forecasts {
            writer.serialize(forecast)?;
        }
        writer.flush()?;

        write_json(&run_dir.join(SUMMARY_FILE), &self.summary)?;
        write_json(&run_dir.join(FACTS_FILE), &self.facts)?;

        let manifest = ArtifactManifest {
            run_id: self.run_id.clone(),
            created_at: self.created_at,
            run_dir: format!("runs/{}", self.run_id),
            horizons,
            failed_horizons: self.failed_horizons.clone(),
            forecasts: ArtifactManifest::relative(&self.run_id, FORECASTS_FILE),
            summary: ArtifactManifest::relative(&self.run_id, SUMMARY_FILE),
            facts: ArtifactManifest::relative(&self.run_id, FACTS_FILE),
            warning_count: self.warnings.len(),
            warnings: self.warnings.clone(),
        };
        manifest.publish(root)?;
        Ok(manifest)
    }
}

/// Run context for one training and forecasting pass
#[derive(Debug, Clone)]
pub struct Pipeline {
    run_id: String,
    created_at: DateTime<Utc>,
    config: PipelineConfig,
    trainer: RollingOriginTrainer,
    warnings: Vec<PipelineWarning>,
}

impl Pipeline {
    /// Create a run context; rejects an invalid configuration before any data is read
    pub fn new(mut config: PipelineConfig) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let (trainer, fallback) = RollingOriginTrainer::new(&config)?;

        let mut warnings = Vec::new();
        if let Some(warning) = fallback {
            warning.log();
            warnings.push(warning);
        }

        let created_at = Utc::now();
        let run_id = format!(
            "{}-{}",
            created_at.format("%Y%m%dT%H%M%SZ"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        info!("Starting run {} with {} models", run_id, trainer.family());

        Ok(Self {
            run_id,
            created_at,
            config,
            trainer,
            warnings,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Classifier family the run will train
    pub fn model_family(&self) -> ModelFamily {
        self.trainer.family()
    }

    /// Warnings raised while building the context
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Validate the input without training
    pub fn validate(&self, table: &PanelTable) -> Result<ValidatedDataset> {
        DatasetValidator::new(&self.config).validate(table)
    }

    /// Validate, engineer features, train every horizon and forecast
    pub fn run(&self, table: &PanelTable) -> Result<RunOutput> {
        let ValidatedDataset { panel, report } = self.validate(table)?;
        let mut warnings = self.warnings.clone();
        warnings.extend(report.warnings.iter().cloned());

        let frame = FeatureEngineer::new(&self.config.features).build(&panel)?;
        for warning in frame.warnings() {
            warning.log();
            warnings.push(warning);
        }

        let deriver = TargetDeriver::new(&self.config.targets);
        let trained: Vec<(Horizon, Result<ModelArtifact>)> = self
            .config
            .training
            .horizons
            .par_iter()
            .map(|&horizon| {
                let result = deriver.derive(&panel, horizon).and_then(|targets| {
                    let set = LabeledSet::attach(&frame, &targets);
                    self.trainer.train(&set, &self.run_id)
                });
                (horizon, result)
            })
            .collect();

        let mut artifacts = Vec::with_capacity(trained.len());
        let mut failed_horizons = BTreeMap::new();
        let mut first_failure = None;
        for (horizon, result) in trained {
            match result {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) if err.is_horizon_local() && !self.config.training.require_all_horizons => {
                    warn!("Horizon {} skipped: {}", horizon, err);
                    failed_horizons.insert(horizon, err.to_string());
                    first_failure.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        if artifacts.is_empty() {
            return Err(first_failure.unwrap_or_else(|| {
                PipelineError::Config("No horizons configured for training".to_string())
            }));
        }

        let batch = ForecastGenerator::new(&self.config.thresholds).generate(
            &panel,
            &frame,
            &artifacts,
        )?;
        warnings.extend(batch.warnings);
        let summary = summarize(&batch.forecasts);

        info!(
            "Run {} finished: {} horizon(s) trained, {} failed, {} forecasts, {} warning(s)",
            self.run_id,
            artifacts.len(),
            failed_horizons.len(),
            batch.forecasts.len(),
            warnings.len()
        );

        Ok(RunOutput {
            run_id: self.run_id.clone(),
            created_at: self.created_at,
            report,
            artifacts,
            failed_horizons,
            forecasts: batch.forecasts,
            facts: batch.facts,
            summary,
            warnings,
        })
    }

    /// Run and publish into `root`; nothing is written if the run fails
    pub fn run_and_publish(&self, table: &PanelTable, root: &Path) -> Result<ArtifactManifest> {
        let output = self.run(table)?;
        output.publish(root)
    }
}
