use cxguard_engine::{anomaly_flag, ModelSelector};

use crate::helpers::{engine_with, good_record, poor_record, trained_bundle};

#[test]
fn test_score_equal_to_threshold_is_not_flagged() {
    let mut bundle = trained_bundle();
    let probe = engine_with(bundle.clone())
        .score_one(&good_record(), &ModelSelector::parse("iforest").unwrap())
        .unwrap();
    let score = probe.scores["iforest"];

    bundle.models.get_mut("iforest").unwrap().metadata.threshold = score;
    let engine = engine_with(bundle.clone());
    let at = engine
        .score_one(&good_record(), &ModelSelector::parse("iforest").unwrap())
        .unwrap();
    assert_eq!(at.scores["iforest"].to_bits(), score.to_bits());
    assert_eq!(at.flags["iforest"], 0);

    bundle.models.get_mut("iforest").unwrap().metadata.threshold = score - 1e-9;
    let engine = engine_with(bundle);
    let below = engine
        .score_one(&good_record(), &ModelSelector::parse("iforest").unwrap())
        .unwrap();
    assert_eq!(below.flags["iforest"], 1);
}

#[test]
fn test_thresholds_lie_within_training_score_range() {
    let bundle = trained_bundle();
    for artifact in bundle.models.values() {
        assert_eq!(artifact.metadata.threshold_percentile, 90.0);
        let stats = artifact.metadata.score_stats;
        assert!(stats.min <= artifact.metadata.threshold && artifact.metadata.threshold <= stats.max);
    }
}

#[test]
fn test_single_model_flag_forces_ensemble_flag() {
    let mut bundle = trained_bundle();
    // Combined threshold out of reach: only the safety net can flag.
    bundle.ensemble_threshold = 1e6;

    let baseline = engine_with(bundle.clone())
        .score_one(&good_record(), &ModelSelector::All)
        .unwrap();
    assert_eq!(baseline.flags["iforest"], 0);
    assert_eq!(baseline.flags["lof"], 0);
    assert_eq!(baseline.ensemble_flag, Some(0));

    // Push LOF's threshold below the good record's score.
    let lof_score = baseline.scores["lof"];
    bundle.models.get_mut("lof").unwrap().metadata.threshold = lof_score / 2.0;
    let result = engine_with(bundle)
        .score_one(&good_record(), &ModelSelector::All)
        .unwrap();
    assert_eq!(result.flags["iforest"], 0);
    assert_eq!(result.flags["lof"], 1);
    assert!(result.ensemble_score.unwrap() < 1e6);
    assert_eq!(result.ensemble_flag, Some(1));
}

#[test]
fn test_ensemble_flag_consistent_with_model_flags() {
    let engine = engine_with(trained_bundle());
    let batch = engine
        .score_batch(&[poor_record(), good_record()], &ModelSelector::All)
        .unwrap();
    for result in &batch.results {
        if result.flags.values().any(|&f| f == 1) {
            assert_eq!(result.ensemble_flag, Some(1));
        }
        for (id, &flag) in &result.flags {
            assert!(flag == 0 || flag == 1, "{} flag {}", id, flag);
        }
    }
    assert_eq!(anomaly_flag(0.5, 0.5), 0);
}
