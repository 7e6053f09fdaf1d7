//! Model comparison over a labelled-free record set: anomaly rates, score
//! distributions, and how much the models agree with each other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use cxguard_core::RawRecord;

use crate::error::{EngineError, Result};
use crate::pipeline::stats::{median, pearson, ColumnSummary};
use crate::scoring::{ModelSelector, ScoringEngine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub model_id: String,
    pub anomalies: usize,
    pub anomaly_rate: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseAgreement {
    pub left: String,
    pub right: String,
    /// Fraction of records on which both flags are equal.
    pub flag_agreement: f64,
    /// Pearson correlation of raw scores; `None` when either side is constant.
    pub score_correlation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub records: usize,
    pub rejected: usize,
    pub generation: u64,
    pub models: Vec<ModelEvaluation>,
    pub ensemble_anomalies: usize,
    pub ensemble_anomaly_rate: f64,
    pub pairs: Vec<PairwiseAgreement>,
}

/// Score `records` with every model and summarize.
pub fn evaluate(engine: &ScoringEngine, records: &[RawRecord]) -> Result<EvaluationReport> {
    let batch = engine.score_batch(records, &ModelSelector::All)?;
    let scored = batch.results.len();
    if scored == 0 {
        return Err(EngineError::config("no scorable records to evaluate"));
    }

    let mut scores: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut flags: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
    for result in &batch.results {
        for (id, &score) in &result.scores {
            scores.entry(id.as_str()).or_default().push(score);
        }
        for (id, &flag) in &result.flags {
            flags.entry(id.as_str()).or_default().push(flag);
        }
    }

    let models: Vec<ModelEvaluation> = scores
        .iter()
        .filter_map(|(&id, values)| {
            let summary = ColumnSummary::of(values)?;
            let anomalies = flags.get(id).map(|f| f.iter().filter(|&&x| x == 1).count()).unwrap_or(0);
            Some(ModelEvaluation {
                model_id: id.to_string(),
                anomalies,
                anomaly_rate: anomalies as f64 / scored as f64,
                min: summary.min,
                max: summary.max,
                mean: summary.mean,
                median: median(values).unwrap_or(summary.mean),
            })
        })
        .collect();

    let ids: Vec<&str> = scores.keys().copied().collect();
    let mut pairs = Vec::new();
    for (i, &left) in ids.iter().enumerate() {
        for &right in &ids[i + 1..] {
            let agree = flags[left]
                .iter()
                .zip(&flags[right])
                .filter(|(a, b)| a == b)
                .count();
            pairs.push(PairwiseAgreement {
                left: left.to_string(),
                right: right.to_string(),
                flag_agreement: agree as f64 / scored as f64,
                score_correlation: pearson(&scores[left], &scores[right]),
            });
        }
    }

    let report = EvaluationReport {
        records: batch.total_records,
        rejected: batch.rejected.len(),
        generation: batch.generation,
        models,
        ensemble_anomalies: batch.anomalies_detected,
        ensemble_anomaly_rate: batch.anomalies_detected as f64 / scored as f64,
        pairs,
    };

    for m in &report.models {
        info!(
            model = %m.model_id,
            anomalies = m.anomalies,
            rate = m.anomaly_rate,
            mean = m.mean,
            median = m.median,
            "model evaluation"
        );
    }
    Ok(report)
}
