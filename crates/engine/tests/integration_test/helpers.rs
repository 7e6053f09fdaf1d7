use std::f64::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cxguard_core::RawRecord;
use cxguard_engine::{train_bundle, ArtifactBundle, ArtifactRegistry, ScoringEngine, TrainingConfig};

/// Number of synthetic training interactions.
pub const TRAINING_SIZE: usize = 400;

/// Box-Muller sample from N(mean, sd).
fn gaussian(rng: &mut StdRng, mean: f64, sd: f64) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    mean + sd * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn pick<'a>(rng: &mut StdRng, options: &[(&'a str, f64)]) -> &'a str {
    let roll: f64 = rng.random();
    let mut acc = 0.0;
    for (value, p) in options {
        acc += p;
        if roll < acc {
            return *value;
        }
    }
    options[options.len() - 1].0
}

/// Typical interactions: csat on a 0-100 scale around 85, short handle times,
/// mostly zero complaints and transfers.
pub fn training_records(n: usize, seed: u64) -> Vec<RawRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let complaints: i64 = if rng.random::<f64>() < 0.8 { 0 } else { 1 };
            let transfers: i64 = if rng.random::<f64>() < 0.8 { 0 } else { 1 };
            let channel = pick(&mut rng, &[("chat", 0.6), ("voice", 0.3), ("email", 0.1)]);
            let language = pick(&mut rng, &[("en", 0.9), ("es", 0.1)]);
            let queue = pick(&mut rng, &[("tech_support", 0.5), ("billing", 0.3), ("general", 0.2)]);
            RawRecord::new(format!("train-{:05}", i))
                .with_timestamp("2024-03-01T10:00:00Z")
                .with("csat", gaussian(&mut rng, 85.0, 4.0))
                .with("ies", gaussian(&mut rng, 92.0, 2.0))
                .with("complaints", complaints)
                .with("aht_seconds", gaussian(&mut rng, 180.0, 30.0).max(30.0))
                .with("hold_time_seconds", gaussian(&mut rng, 15.0, 5.0).max(0.0))
                .with("transfers", transfers)
                .with("channel", channel)
                .with("language", language)
                .with("queue", queue)
        })
        .collect()
}

pub fn good_record() -> RawRecord {
    RawRecord::new("good-1")
        .with("csat", 85)
        .with("ies", 92)
        .with("complaints", 0)
        .with("aht_seconds", 180)
        .with("hold_time_seconds", 15)
        .with("transfers", 0)
        .with("channel", "chat")
        .with("language", "en")
        .with("queue", "tech_support")
}

pub fn poor_record() -> RawRecord {
    RawRecord::new("poor-1")
        .with("csat", 1)
        .with("ies", 20)
        .with("complaints", 5)
        .with("aht_seconds", 3600)
        .with("hold_time_seconds", 1800)
        .with("transfers", 8)
        .with("channel", "voice")
        .with("language", "en")
        .with("queue", "billing")
}

/// Train a bundle on the default synthetic data with the default config.
pub fn trained_bundle() -> ArtifactBundle {
    trained_bundle_with(&TrainingConfig::default(), 7)
}

pub fn trained_bundle_with(config: &TrainingConfig, data_seed: u64) -> ArtifactBundle {
    train_bundle(&training_records(TRAINING_SIZE, data_seed), config).unwrap()
}

/// Engine over a fresh registry with `bundle` swapped in.
pub fn engine_with(bundle: ArtifactBundle) -> ScoringEngine {
    let registry = Arc::new(ArtifactRegistry::new());
    registry.swap(bundle).unwrap();
    ScoringEngine::new(registry)
}
