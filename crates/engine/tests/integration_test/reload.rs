use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cxguard_engine::{
    ArtifactBundle, ArtifactRegistry, EngineError, ModelSelector, ScoringEngine, TrainingConfig,
};

use crate::helpers::{engine_with, good_record, poor_record, trained_bundle, trained_bundle_with};

#[test]
fn test_save_load_round_trip_scores_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifacts").join("bundle.cxb");

    let bundle = trained_bundle();
    bundle.save(&path).unwrap();
    assert!(path.is_file());
    assert!(!dir.path().join("artifacts").join(".bundle.cxb.tmp").exists());

    let header = fs::read(&path).unwrap();
    assert!(header.starts_with(b"cxguard-bundle v1 sha256="));

    let in_memory = engine_with(bundle.clone());
    let from_disk = ScoringEngine::open(&path).unwrap();
    let records = vec![poor_record(), good_record()];
    let a = in_memory.score_batch(&records, &ModelSelector::All).unwrap();
    let b = from_disk.score_batch(&records, &ModelSelector::All).unwrap();
    assert_eq!(a.results, b.results);

    let models = from_disk.list_models().unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].model_id, "iforest");
    assert_eq!(models[1].model_id, "lof");
    assert_eq!(models[0].n_features, bundle.pipeline.width());
    assert_eq!(models[1].n_samples, bundle.training.records);

    let info = from_disk.registry().current_metadata().unwrap();
    assert_eq!(info.bundle_id, bundle.bundle_id);
    assert_eq!(info.generation, 1);
    assert_eq!(info.source.as_deref(), Some(path.as_path()));
}

#[test]
fn test_corrupt_bundle_keeps_active_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let good_path = dir.path().join("good.cxb");
    let bad_path = dir.path().join("bad.cxb");
    trained_bundle().save(&good_path).unwrap();

    let registry = Arc::new(ArtifactRegistry::open(&good_path).unwrap());
    let engine = ScoringEngine::new(Arc::clone(&registry));
    let before = engine.score_one(&good_record(), &ModelSelector::All).unwrap();
    let models_before = registry.list_models().unwrap();

    fs::write(&bad_path, b"cxguard-bundle v1 sha256=deadbeef\n{\"truncated\":").unwrap();
    let err = registry.reload(&bad_path).unwrap_err();
    assert!(matches!(err, EngineError::ArtifactLoad { .. }), "{:?}", err);

    fs::write(&bad_path, b"not a bundle").unwrap();
    assert!(registry.reload(&bad_path).is_err());

    assert_eq!(registry.generation(), 1);
    let after = engine.score_one(&good_record(), &ModelSelector::All).unwrap();
    assert_eq!(before, after);
    assert_eq!(registry.list_models().unwrap(), models_before);
}

#[test]
fn test_tampered_payload_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.cxb");
    trained_bundle().save(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 2;
    bytes[last] = if bytes[last] == b'1' { b'2' } else { b'1' };
    fs::write(&path, &bytes).unwrap();

    match ArtifactRegistry::load(&path) {
        Err(EngineError::ArtifactLoad { reason, .. }) => {
            assert!(reason.contains("checksum"), "{}", reason)
        }
        other => panic!("expected checksum failure, got {:?}", other.map(|b| b.bundle_id)),
    }
}

#[test]
fn test_unknown_strategy_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.cxb");
    let mut bundle = trained_bundle();
    bundle.ensemble.strategy = "stacking".to_string();
    bundle.save(&path).unwrap();

    let err = ArtifactBundle::load(&path).unwrap_err();
    assert!(matches!(err, EngineError::InvalidStrategy(ref s) if s == "stacking"));

    let registry = ArtifactRegistry::new();
    assert!(registry.swap(bundle).is_err());
    assert!(!registry.is_loaded());
}

#[test]
fn test_width_mismatch_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.cxb");
    let mut bundle = trained_bundle();
    let other = trained_bundle_with(
        &TrainingConfig {
            features: cxguard_engine::FeatureSpec {
                categorical: vec![],
                ..Default::default()
            },
            ..TrainingConfig::default()
        },
        7,
    );
    bundle.pipeline = other.pipeline;
    bundle.save(&path).unwrap();

    let err = ArtifactBundle::load(&path).unwrap_err();
    match err {
        EngineError::ArtifactLoad { reason, .. } => assert!(reason.contains("features"), "{}", reason),
        other => panic!("expected ArtifactLoad, got {:?}", other),
    }
}

#[test]
fn test_concurrent_scoring_sees_whole_bundles() {
    let config_b = TrainingConfig::default();
    let bundle_a = trained_bundle();
    let bundle_b = trained_bundle_with(&config_b, 99);

    let records = vec![poor_record(), good_record()];
    let expected_a = engine_with(bundle_a.clone())
        .score_batch(&records, &ModelSelector::All)
        .unwrap()
        .results;
    let expected_b = engine_with(bundle_b.clone())
        .score_batch(&records, &ModelSelector::All)
        .unwrap()
        .results;
    assert_ne!(expected_a, expected_b);

    let registry = Arc::new(ArtifactRegistry::new());
    registry.swap(bundle_a.clone()).unwrap();
    let engine = ScoringEngine::new(Arc::clone(&registry));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let records = records.clone();
            let expected_a = expected_a.clone();
            let expected_b = expected_b.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let batch = engine.score_batch(&records, &ModelSelector::All).unwrap();
                    // Odd generations hold bundle A, even ones bundle B.
                    let expected = if batch.generation % 2 == 1 { &expected_a } else { &expected_b };
                    assert_eq!(&batch.results, expected, "generation {}", batch.generation);
                }
            })
        })
        .collect();

    for i in 0..20 {
        let next = if i % 2 == 0 { bundle_b.clone() } else { bundle_a.clone() };
        registry.swap(next).unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(registry.generation(), 21);
}

#[test]
fn test_watcher_hot_reloads_on_replace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.cxb");
    trained_bundle().save(&path).unwrap();

    let registry = Arc::new(ArtifactRegistry::open(&path).unwrap());
    let watcher = registry.watch(&path).unwrap();
    assert_eq!(watcher.path(), path.as_path());

    let replacement = trained_bundle_with(&TrainingConfig::default(), 99);
    let replacement_id = replacement.bundle_id;
    replacement.save(&path).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if registry.current().unwrap().bundle.bundle_id == replacement_id {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(registry.current().unwrap().bundle.bundle_id, replacement_id);
    assert!(registry.generation() >= 2);

    // A broken write is ignored; the replacement stays active.
    fs::write(&path, b"garbage").unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(registry.current().unwrap().bundle.bundle_id, replacement_id);
}
