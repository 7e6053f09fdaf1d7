use cxguard_engine::evaluate;

use crate::helpers::{engine_with, poor_record, trained_bundle, training_records, TRAINING_SIZE};

#[test]
fn test_evaluation_report_on_training_data() {
    let engine = engine_with(trained_bundle());
    let mut records = training_records(TRAINING_SIZE, 7);
    records.push(poor_record());

    let report = evaluate(&engine, &records).unwrap();
    assert_eq!(report.records, TRAINING_SIZE + 1);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.generation, 1);

    let ids: Vec<&str> = report.models.iter().map(|m| m.model_id.as_str()).collect();
    assert_eq!(ids, vec!["iforest", "lof"]);

    let iforest = &report.models[0];
    // Threshold sits at the 90th percentile of these very scores.
    assert!(
        iforest.anomaly_rate > 0.05 && iforest.anomaly_rate < 0.15,
        "rate {}",
        iforest.anomaly_rate
    );
    assert!(iforest.min <= iforest.median && iforest.median <= iforest.max);

    assert_eq!(report.pairs.len(), 1);
    let pair = &report.pairs[0];
    assert_eq!((pair.left.as_str(), pair.right.as_str()), ("iforest", "lof"));
    assert!((0.0..=1.0).contains(&pair.flag_agreement));
    let r = pair.score_correlation.unwrap();
    assert!(r > 0.0 && r <= 1.0, "correlation {}", r);

    assert!(report.ensemble_anomalies >= iforest.anomalies);
}
