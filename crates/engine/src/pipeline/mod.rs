//! Feature pipeline.
//!
//! Turns validated interaction records into dense, fixed-order feature
//! vectors. Everything the transform needs (imputation values, scaling
//! statistics, categorical vocabularies) is captured once at fit time and
//! serialized with the bundle, so training and serving share one code path.
//!
//! Output layout:
//! - one dimension per numeric feature, in configured order;
//! - per categorical feature, one dimension per fitted vocabulary entry
//!   (sorted) followed by one "unknown" dimension.

pub mod spec;
pub mod stats;

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cxguard_core::{CategoricalField, InteractionRecord, NumericField, SchemaError};

pub use self::spec::{FeatureSpec, NumericStrategy, ScaleMethod, UnknownCategoryPolicy};
use self::stats::{median, ColumnSummary};
use crate::error::{EngineError, Result};

/// Token substituted for an absent categorical value before encoding.
pub const MISSING_CATEGORY: &str = "missing";

/// Display name suffix for a categorical column's unknown dimension.
const UNKNOWN_LABEL: &str = "<unknown>";

/// Fitted preprocessing for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumn {
    pub field: NumericField,
    /// Value used when the record has no value.
    pub impute: f64,
    /// Subtracted before scaling (mean or min).
    pub center: f64,
    /// Divisor after centering (std or range, 1.0 when degenerate).
    pub scale: f64,
}

impl NumericColumn {
    #[inline]
    fn apply(&self, value: Option<f64>) -> f64 {
        (value.unwrap_or(self.impute) - self.center) / self.scale
    }
}

/// Fitted vocabulary for one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub field: CategoricalField,
    /// Sorted, deduplicated categories seen at fit time.
    pub vocabulary: Vec<String>,
}

impl CategoricalColumn {
    /// Vocabulary dimensions plus the unknown dimension.
    fn width(&self) -> usize {
        self.vocabulary.len() + 1
    }
}

/// Fitted pipeline state. Immutable once built; `transform` is pure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    pub spec: FeatureSpec,
    pub numeric: Vec<NumericColumn>,
    pub categorical: Vec<CategoricalColumn>,
    /// Number of records the pipeline was fitted on.
    pub fitted_on: usize,
}

impl FeaturePipeline {
    /// Capture imputation values, scaling statistics and vocabularies from
    /// `records`.
    ///
    /// Scaling statistics are computed on the imputed column, so a missing
    /// value transforms exactly like a record carrying the imputed value.
    pub fn fit(records: &[InteractionRecord], spec: &FeatureSpec) -> Result<Self> {
        let (numeric_fields, categorical_fields) = spec.resolve()?;
        if records.is_empty() {
            return Err(EngineError::config("cannot fit feature pipeline on zero records"));
        }

        let numeric = numeric_fields
            .iter()
            .map(|&field| fit_numeric(records, field, spec))
            .collect::<Vec<_>>();

        let categorical = categorical_fields
            .iter()
            .map(|&field| {
                let vocabulary: BTreeSet<&str> = records
                    .iter()
                    .map(|r| r.categorical(field).unwrap_or(MISSING_CATEGORY))
                    .collect();
                CategoricalColumn {
                    field,
                    vocabulary: vocabulary.into_iter().map(str::to_string).collect(),
                }
            })
            .collect::<Vec<_>>();

        let pipeline = Self {
            spec: spec.clone(),
            numeric,
            categorical,
            fitted_on: records.len(),
        };

        info!(
            records = records.len(),
            width = pipeline.width(),
            numeric = pipeline.numeric.len(),
            categorical = pipeline.categorical.len(),
            "feature pipeline fitted"
        );
        Ok(pipeline)
    }

    /// Encode a single record.
    pub fn transform(&self, record: &InteractionRecord) -> std::result::Result<Vec<f64>, SchemaError> {
        let mut out = Vec::with_capacity(self.width());

        for column in &self.numeric {
            out.push(column.apply(record.numeric(column.field)));
        }

        for column in &self.categorical {
            let value = record.categorical(column.field).unwrap_or(MISSING_CATEGORY);
            let start = out.len();
            out.resize(start + column.width(), 0.0);
            match column.vocabulary.binary_search_by(|v| v.as_str().cmp(value)) {
                Ok(idx) => out[start + idx] = 1.0,
                Err(_) => match self.spec.unknown_category {
                    UnknownCategoryPolicy::UnknownBucket => {
                        debug!(
                            interaction_id = %record.interaction_id,
                            field = column.field.name(),
                            value,
                            "unseen category routed to unknown bucket"
                        );
                        out[start + column.vocabulary.len()] = 1.0;
                    }
                    UnknownCategoryPolicy::Reject => {
                        return Err(SchemaError::new(
                            column.field.name(),
                            format!("category '{}' was not seen during training", value),
                        ));
                    }
                },
            }
        }

        Ok(out)
    }

    /// Encode many records in parallel. Results are in input order.
    pub fn transform_batch(
        &self,
        records: &[InteractionRecord],
    ) -> Vec<std::result::Result<Vec<f64>, SchemaError>> {
        records.par_iter().map(|r| self.transform(r)).collect()
    }

    /// Number of output dimensions.
    pub fn width(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(CategoricalColumn::width).sum::<usize>()
    }

    /// Name of every output dimension, in vector order.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|c| c.field.name().to_string()).collect();
        for column in &self.categorical {
            let field = column.field.name();
            names.extend(column.vocabulary.iter().map(|v| format!("{}={}", field, v)));
            names.push(format!("{}={}", field, UNKNOWN_LABEL));
        }
        names
    }
}

fn fit_numeric(records: &[InteractionRecord], field: NumericField, spec: &FeatureSpec) -> NumericColumn {
    let observed: Vec<f64> = records.iter().filter_map(|r| r.numeric(field)).collect();

    let impute = match spec.numeric_strategy {
        NumericStrategy::Constant => spec.fill_value,
        NumericStrategy::Mean => ColumnSummary::of(&observed).map(|s| s.mean).unwrap_or(0.0),
        NumericStrategy::Median => median(&observed).unwrap_or(0.0),
    };
    if observed.is_empty() {
        warn!(field = field.name(), impute, "no observed values at fit time");
    }

    let filled: Vec<f64> = records.iter().map(|r| r.numeric(field).unwrap_or(impute)).collect();
    // `filled` has one entry per record and records is non-empty.
    let summary = ColumnSummary::of(&filled).unwrap_or(ColumnSummary {
        count: 0,
        mean: impute,
        std: 0.0,
        min: impute,
        max: impute,
    });

    let (center, spread) = match spec.scale_method {
        ScaleMethod::Standard => (summary.mean, summary.std),
        ScaleMethod::MinMax => (summary.min, summary.max - summary.min),
    };
    let scale = if spread > f64::EPSILON { spread } else { 1.0 };

    NumericColumn {
        field,
        impute,
        center,
        scale,
    }
}
