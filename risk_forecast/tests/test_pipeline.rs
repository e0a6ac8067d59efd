use pretty_assertions::assert_eq;
use risk_forecast::artifact::{ArtifactManifest, MANIFEST_FILE};
use risk_forecast::categorize::RiskThresholds;
use risk_forecast::{
    DataLoader, Forecast, Horizon, Pipeline, PipelineConfig, PipelineError, PipelineWarning,
    Period,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const CONFIG: &str = r#"
[features]
candidates = ["ndvi_anomaly"]
lags = [1, 2]
"#;

fn signal(region: usize, month: usize) -> f64 {
    ((month * 37 + region * 11) % 17) as f64 / 4.0 - 2.0
}

// Helper function to write a synthetic panel with one signal and a binary outcome
fn write_panel(dir: &Path, region_header: &str, months: usize) -> PathBuf {
    let path = dir.join("panel.csv");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "{},period,ndvi_anomaly,risk_label", region_header).unwrap();
    for (r, region) in ["north", "east", "south"].iter().enumerate() {
        for m in 0..months {
            let value = signal(r, m);
            let label = if value > 0.0 { 1 } else { 0 };
            writeln!(file, "{},2023/{:02},{},{}", region, m + 1, value, label).unwrap();
        }
    }
    path
}

fn read_forecasts(path: &Path) -> Vec<Forecast> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .deserialize::<Forecast>()
        .map(|row| row.unwrap())
        .collect()
}

#[test]
fn test_end_to_end_three_regions_twelve_periods() {
    let dir = tempdir().unwrap();
    let data = write_panel(dir.path(), "region", 12);
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();

    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let pipeline = Pipeline::new(config).unwrap();
    let table = DataLoader::from_csv(&data).unwrap();
    assert_eq!(table.len(), 36);

    let manifest = pipeline.run_and_publish(&table, &out).unwrap();

    let horizons: Vec<Horizon> = manifest.horizons.iter().map(|e| e.horizon).collect();
    assert_eq!(horizons, Horizon::ALL.to_vec());
    assert!(manifest.failed_horizons.is_empty());
    for entry in &manifest.horizons {
        assert!(out.join(&entry.artifact).exists());
        assert!(out.join(&entry.metrics).exists());
    }

    let forecasts = read_forecasts(&out.join(&manifest.forecasts));
    assert_eq!(forecasts.len(), 9);
    let latest = Period::new(2023, 12).unwrap();
    for forecast in &forecasts {
        assert_eq!(forecast.anchor_period, latest);
        assert!(forecast.probability_lo <= forecast.probability);
        assert!(forecast.probability <= forecast.probability_hi);
        assert!((0.0..=1.0).contains(&forecast.probability_lo));
        assert!((0.0..=1.0).contains(&forecast.probability_hi));
        // bounds carry uncertainty even when calibration is sharp
        assert!(
            forecast.probability_hi > forecast.probability_lo,
            "degenerate interval for {} {}",
            forecast.region,
            forecast.horizon
        );
    }
    for region in ["north", "east", "south"] {
        let mut seen: Vec<Horizon> = forecasts
            .iter()
            .filter(|f| f.region == region)
            .map(|f| f.horizon)
            .collect();
        seen.sort();
        assert_eq!(seen, Horizon::ALL.to_vec());
    }

    // The published manifest is the one returned and points at loadable artifacts
    let published = ArtifactManifest::load(&out).unwrap();
    assert_eq!(published, manifest);
    let artifact = published.artifact(&out, Horizon::H2).unwrap().unwrap();
    assert_eq!(artifact.horizon, Horizon::H2);
    let h2 = forecasts.iter().find(|f| f.horizon == Horizon::H2).unwrap();
    assert_eq!(artifact.version, h2.model_version);
    assert!(!out.join(format!("{}.tmp", MANIFEST_FILE)).exists());
    assert!(out.join(&manifest.summary).exists());
    assert!(out.join(&manifest.facts).exists());
}

#[test]
fn test_missing_region_column_writes_nothing() {
    let dir = tempdir().unwrap();
    let data = write_panel(dir.path(), "district", 12);
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();

    let pipeline = Pipeline::new(PipelineConfig::from_toml_str(CONFIG).unwrap()).unwrap();
    let table = DataLoader::from_csv(&data).unwrap();
    let err = pipeline.run_and_publish(&table, &out).unwrap_err();

    assert!(matches!(err, PipelineError::Schema(_)));
    assert!(!out.join(MANIFEST_FILE).exists());
    assert!(!out.join("runs").exists());
}

#[test]
fn test_inverted_thresholds_fail_before_training() {
    let doc = format!("{}\n[thresholds.h1]\nred = 0.3\nyellow = 0.5\n", CONFIG);
    let err = PipelineConfig::from_toml_str(&doc).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidThresholds { horizon, .. } if horizon == Horizon::H1));

    // Built in code rather than parsed: the run context rejects it
    let mut config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    config.thresholds.h3 = RiskThresholds { red: 0.3, yellow: 0.5 };
    let err = Pipeline::new(config).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidThresholds { horizon, .. } if horizon == Horizon::H3));
}

#[test]
fn test_duplicate_rows_are_rejected() {
    let dir = tempdir().unwrap();
    let data = write_panel(dir.path(), "region", 6);
    let mut file = fs::OpenOptions::new().append(true).open(&data).unwrap();
    writeln!(file, "east,2023/03,0.5,1").unwrap();

    let pipeline = Pipeline::new(PipelineConfig::from_toml_str(CONFIG).unwrap()).unwrap();
    let table = DataLoader::from_csv(&data).unwrap();
    let err = pipeline.validate(&table).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateKey { ref region, .. } if region == "east"));
}

#[test]
fn test_short_history_skips_long_horizons() {
    let dir = tempdir().unwrap();
    let data = write_panel(dir.path(), "region", 7);
    let table = DataLoader::from_csv(&data).unwrap();

    let pipeline = Pipeline::new(PipelineConfig::from_toml_str(CONFIG).unwrap()).unwrap();
    let output = pipeline.run(&table).unwrap();
    assert_eq!(output.artifacts.len(), 1);
    assert_eq!(output.artifacts[0].horizon, Horizon::H1);
    assert!(output.failed_horizons.contains_key(&Horizon::H3));
    assert_eq!(output.forecasts.len(), 3);

    let strict = format!("{}\n[training]\nrequire_all_horizons = true\n", CONFIG);
    let pipeline = Pipeline::new(PipelineConfig::from_toml_str(&strict).unwrap()).unwrap();
    let err = pipeline.run(&table).unwrap_err();
    assert!(matches!(err, PipelineError::InsufficientData { .. }));
}

#[test]
fn test_summary_and_facts_cover_every_forecast() {
    let dir = tempdir().unwrap();
    let data = write_panel(dir.path(), "county", 12);
    let table = DataLoader::from_csv(&data).unwrap();

    let pipeline = Pipeline::new(PipelineConfig::from_toml_str(CONFIG).unwrap()).unwrap();
    let output = pipeline.run(&table).unwrap();

    assert_eq!(output.report.schema.region_column, "county");
    assert_eq!(output.summary.total, 9);
    assert_eq!(output.summary.by_region.len(), 3);
    assert_eq!(output.facts.len(), 9);
    assert!(output.facts.iter().all(|f| f.signals.contains_key("ndvi_anomaly")));
}

#[test]
fn test_model_fallback_warning_matches_build() {
    let pipeline = Pipeline::new(PipelineConfig::from_toml_str(CONFIG).unwrap()).unwrap();
    let fallback = pipeline
        .warnings()
        .iter()
        .any(|w| matches!(w, PipelineWarning::ModelFallback { .. }));
    assert_eq!(fallback, !cfg!(feature = "boosting"));
}
