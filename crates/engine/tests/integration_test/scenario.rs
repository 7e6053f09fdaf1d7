use cxguard_core::RawRecord;
use cxguard_engine::{EngineError, ModelSelector, TrainingConfig};

use crate::helpers::{engine_with, good_record, poor_record, trained_bundle, trained_bundle_with};

#[test]
fn test_end_to_end_poor_and_good_records() {
    let engine = engine_with(trained_bundle());
    let batch = engine
        .score_batch(&[poor_record(), good_record()], &ModelSelector::All)
        .unwrap();

    assert_eq!(batch.total_records, 2);
    assert!(batch.rejected.is_empty());
    assert_eq!(batch.anomalies_detected, 1);

    let poor = &batch.results[0];
    assert_eq!(poor.interaction_id, "poor-1");
    assert_eq!(poor.flags["iforest"], 1);
    assert_eq!(poor.flags["lof"], 1);
    assert_eq!(poor.ensemble_flag, Some(1));

    let good = &batch.results[1];
    assert_eq!(good.interaction_id, "good-1");
    assert_eq!(good.flags["iforest"], 0, "scores: {:?}", good.scores);
    assert_eq!(good.flags["lof"], 0, "scores: {:?}", good.scores);
    assert_eq!(good.ensemble_flag, Some(0), "ensemble score: {:?}", good.ensemble_score);
}

#[test]
fn test_poor_record_scores_higher_under_every_model() {
    let engine = engine_with(trained_bundle());
    let poor = engine.score_one(&poor_record(), &ModelSelector::All).unwrap();
    let good = engine.score_one(&good_record(), &ModelSelector::All).unwrap();

    for model in ["iforest", "lof"] {
        assert!(
            poor.scores[model] > good.scores[model],
            "{}: poor={} good={}",
            model,
            poor.scores[model],
            good.scores[model]
        );
    }
    assert!(poor.ensemble_score.unwrap() > good.ensemble_score.unwrap());
}

#[test]
fn test_every_strategy_flags_the_poor_record() {
    for strategy in ["average", "max", "voting"] {
        let mut config = TrainingConfig::default();
        config.ensemble.strategy = strategy.to_string();
        let engine = engine_with(trained_bundle_with(&config, 7));
        let result = engine.score_one(&poor_record(), &ModelSelector::All).unwrap();
        assert_eq!(result.ensemble_flag, Some(1), "strategy {}", strategy);
    }
}

#[test]
fn test_single_model_selection_matches_all() {
    let engine = engine_with(trained_bundle());
    let records = vec![poor_record(), good_record()];
    let all = engine.score_batch(&records, &ModelSelector::All).unwrap();
    let lof = engine.score_batch(&records, &ModelSelector::parse("LOF").unwrap()).unwrap();

    for (a, l) in all.results.iter().zip(&lof.results) {
        assert_eq!(l.scores.len(), 1);
        assert_eq!(l.scores["lof"].to_bits(), a.scores["lof"].to_bits());
        assert_eq!(l.flags["lof"], a.flags["lof"]);
        assert_eq!(l.ensemble_score, None);
        assert_eq!(l.ensemble_flag, None);
    }
    assert_eq!(lof.anomalies_detected, 1);
}

#[test]
fn test_unknown_model_fails_whole_batch() {
    let engine = engine_with(trained_bundle());
    let err = engine
        .score_batch(&[good_record()], &ModelSelector::parse("svm").unwrap())
        .unwrap_err();
    match err {
        EngineError::UnknownModel { requested, available } => {
            assert_eq!(requested, "svm");
            assert_eq!(available, "iforest, lof");
        }
        other => panic!("expected UnknownModel, got {:?}", other),
    }
}

#[test]
fn test_output_order_and_rejected_records() {
    let engine = engine_with(trained_bundle());
    let mut records: Vec<RawRecord> = (0..40)
        .map(|i| {
            let mut r = good_record().with("aht_seconds", 150 + i);
            r.interaction_id = Some(format!("rec-{:03}", i).into());
            r
        })
        .collect();
    records[5] = RawRecord::new("bad-csat").with("csat", "very happy");
    records[17] = RawRecord::new("bad-ts").with_timestamp("yesterday");

    let batch = engine.score_batch(&records, &ModelSelector::All).unwrap();
    assert_eq!(batch.total_records, 40);
    assert_eq!(batch.results.len(), 38);
    assert_eq!(batch.rejected.len(), 2);
    assert_eq!(batch.rejected[0].index, 5);
    assert_eq!(batch.rejected[0].interaction_id.as_deref(), Some("bad-csat"));
    assert!(batch.rejected[0].reason.contains("csat"));
    assert_eq!(batch.rejected[1].index, 17);

    let expected: Vec<String> = (0..40)
        .filter(|i| *i != 5 && *i != 17)
        .map(|i| format!("rec-{:03}", i))
        .collect();
    let got: Vec<String> = batch.results.iter().map(|r| r.interaction_id.clone()).collect();
    assert_eq!(got, expected);
}

#[test]
fn test_score_one_surfaces_schema_error() {
    let engine = engine_with(trained_bundle());
    let err = engine
        .score_one(&good_record().with("transfers", 1.5), &ModelSelector::All)
        .unwrap_err();
    assert!(matches!(err, EngineError::Schema(ref e) if e.field == "transfers"));
}

#[test]
fn test_missing_fields_are_imputed_not_rejected() {
    let engine = engine_with(trained_bundle());
    let sparse = RawRecord::new("sparse-1").with("csat", 84);
    let result = engine.score_one(&sparse, &ModelSelector::All).unwrap();
    assert_eq!(result.scores.len(), 2);
    assert!(result.ensemble_score.is_some());
}

#[test]
fn test_training_is_deterministic() {
    let a = trained_bundle();
    let b = trained_bundle();
    assert_ne!(a.bundle_id, b.bundle_id);
    for id in ["iforest", "lof"] {
        assert_eq!(
            a.models[id].metadata.threshold.to_bits(),
            b.models[id].metadata.threshold.to_bits()
        );
    }
    assert_eq!(a.ensemble_threshold.to_bits(), b.ensemble_threshold.to_bits());

    let ea = engine_with(a);
    let eb = engine_with(b);
    let records = vec![poor_record(), good_record()];
    let ra = ea.score_batch(&records, &ModelSelector::All).unwrap();
    let rb = eb.score_batch(&records, &ModelSelector::All).unwrap();
    assert_eq!(ra.results, rb.results);
}

#[test]
fn test_extreme_handle_time_scores_above_poor_record_under_lof() {
    let engine = engine_with(trained_bundle());
    let selector = ModelSelector::parse("lof").unwrap();
    let baseline = engine.score_one(&poor_record(), &selector).unwrap();

    for aht in [1e100, 1e200, 1e300] {
        let extreme = engine
            .score_one(&poor_record().with("aht_seconds", aht), &selector)
            .unwrap();
        assert!(extreme.scores["lof"].is_finite(), "aht={}: {:?}", aht, extreme.scores);
        assert!(
            extreme.scores["lof"] > baseline.scores["lof"],
            "aht={}: extreme={} poor={}",
            aht,
            extreme.scores["lof"],
            baseline.scores["lof"]
        );
        assert_eq!(extreme.flags["lof"], 1, "aht={}", aht);
    }
}
