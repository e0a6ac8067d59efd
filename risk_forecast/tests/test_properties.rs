use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use risk_forecast::config::{FeatureConfig, TargetConfig, TrainingConfig};
use risk_forecast::data::Panel;
use risk_forecast::training::rolling_origin_folds;
use risk_forecast::{
    categorize, DataLoader, DatasetValidator, FeatureEngineer, Horizon, LabeledSet, Period,
    PipelineConfig, RiskTier, TargetDeriver,
};
use rstest::rstest;

fn config() -> PipelineConfig {
    PipelineConfig {
        features: FeatureConfig {
            candidates: vec!["rainfall_anomaly".to_string()],
            ..Default::default()
        },
        training: TrainingConfig {
            horizons: vec![Horizon::H1],
            ..Default::default()
        },
        ..Default::default()
    }
}

// Random panel with calendar holes and a continuous outcome
fn random_panel(seed: u64) -> Panel {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Period::new(2020, 6).unwrap();
    let mut regions = Vec::new();
    let mut periods = Vec::new();
    let mut values = Vec::new();
    let mut outcomes = Vec::new();

    for region in ["r1", "r2", "r3", "r4"] {
        for i in 0..30 {
            if i > 0 && rng.gen_bool(0.1) {
                continue;
            }
            regions.push(region.to_string());
            periods.push(start.offset(i).to_string());
            values.push(rng.gen_range(-3.0..3.0));
            outcomes.push(if rng.gen_bool(0.2) { None } else { Some(rng.gen_range(0.0..2.0)) });
        }
    }

    let df = DataFrame::new(vec![
        Series::new("region", regions),
        Series::new("month", periods),
        Series::new("rainfall_anomaly", values),
        Series::new("risk_label", outcomes),
    ])
    .unwrap();
    DatasetValidator::new(&config())
        .validate(&DataLoader::from_dataframe(df))
        .unwrap()
        .panel
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_target_equals_future_outcome(#[case] seed: u64) {
    let panel = random_panel(seed);
    let deriver = TargetDeriver::new(&TargetConfig::default());

    for horizon in Horizon::ALL {
        let targets = deriver.derive(&panel, horizon).unwrap();
        for (region, rows) in panel.regions() {
            for obs in rows {
                let future = panel
                    .find(region, obs.period.offset(horizon.periods() as i64))
                    .and_then(|o| o.outcomes.base);
                assert_eq!(targets.get(region, obs.period), future.map(|y| y >= 1.0));
            }
        }
    }
}

#[rstest]
#[case(Horizon::H1, 2)]
#[case(Horizon::H2, 3)]
#[case(Horizon::H3, 4)]
fn test_folds_train_strictly_before_validation(#[case] horizon: Horizon, #[case] n_folds: usize) {
    let panel = random_panel(7);
    let frame = FeatureEngineer::new(&config().features).build(&panel).unwrap();
    let targets = TargetDeriver::new(&TargetConfig::default())
        .derive(&panel, horizon)
        .unwrap();
    let set = LabeledSet::attach(&frame, &targets);

    for embargo in [false, true] {
        let plans = rolling_origin_folds(&set, n_folds, 1, embargo).unwrap();
        assert_eq!(plans.len(), n_folds);
        for plan in &plans {
            let min_valid = plan
                .validation
                .iter()
                .map(|&i| set.rows()[i].period)
                .min()
                .unwrap();
            assert!(plan.train.iter().all(|&i| set.rows()[i].period < min_valid));
        }
    }
}

#[test]
fn test_labeled_set_is_sorted_by_period_then_region() {
    let panel = random_panel(11);
    let frame = FeatureEngineer::new(&config().features).build(&panel).unwrap();
    let targets = TargetDeriver::new(&TargetConfig::default())
        .derive(&panel, Horizon::H2)
        .unwrap();
    let set = LabeledSet::attach(&frame, &targets);

    assert!(!set.is_empty());
    assert!(set
        .rows()
        .windows(2)
        .all(|w| (w[0].period, &w[0].region) < (w[1].period, &w[1].region)));
    assert_eq!(set.feature_names(), frame.feature_names());
}

#[test]
fn test_tier_never_low_near_certainty() {
    let thresholds = PipelineConfig::default().thresholds;
    for horizon in Horizon::ALL {
        assert_eq!(categorize(&thresholds, horizon, 0.99), RiskTier::High);
        assert_eq!(categorize(&thresholds, horizon, 0.01), RiskTier::Low);
    }
}
