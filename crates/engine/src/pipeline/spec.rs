use serde::{Deserialize, Serialize};

use cxguard_core::{CategoricalField, NumericField};

use crate::error::{EngineError, Result};

/// How missing numeric values are filled before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericStrategy {
    #[default]
    Mean,
    Median,
    /// Use `FeatureSpec::fill_value`.
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMethod {
    /// (x - mean) / std
    #[default]
    Standard,
    /// (x - min) / (max - min)
    MinMax,
}

/// What happens to a categorical value not seen at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategoryPolicy {
    /// Route to the column's dedicated unknown dimension.
    #[default]
    UnknownBucket,
    /// Fail the record with a schema error.
    Reject,
}

/// Feature selection and preprocessing options, as read from the training
/// YAML under `features:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    #[serde(default = "default_numeric")]
    pub numeric: Vec<String>,
    #[serde(default = "default_categorical")]
    pub categorical: Vec<String>,
    #[serde(default)]
    pub numeric_strategy: NumericStrategy,
    #[serde(default)]
    pub fill_value: f64,
    #[serde(default)]
    pub scale_method: ScaleMethod,
    #[serde(default)]
    pub unknown_category: UnknownCategoryPolicy,
}

fn default_numeric() -> Vec<String> {
    NumericField::ALL.iter().map(|f| f.name().to_string()).collect()
}

fn default_categorical() -> Vec<String> {
    CategoricalField::ALL.iter().map(|f| f.name().to_string()).collect()
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            numeric: default_numeric(),
            categorical: default_categorical(),
            numeric_strategy: NumericStrategy::default(),
            fill_value: 0.0,
            scale_method: ScaleMethod::default(),
            unknown_category: UnknownCategoryPolicy::default(),
        }
    }
}

impl FeatureSpec {
    /// Resolve configured names to field enums, rejecting unknown or
    /// repeated names and an empty selection.
    pub(crate) fn resolve(&self) -> Result<(Vec<NumericField>, Vec<CategoricalField>)> {
        let mut numeric = Vec::with_capacity(self.numeric.len());
        for name in &self.numeric {
            let field = NumericField::from_name(name)
                .ok_or_else(|| EngineError::config(format!("unknown numeric feature '{}'", name)))?;
            if numeric.contains(&field) {
                return Err(EngineError::config(format!("numeric feature '{}' listed twice", name)));
            }
            numeric.push(field);
        }

        let mut categorical = Vec::with_capacity(self.categorical.len());
        for name in &self.categorical {
            let field = CategoricalField::from_name(name)
                .ok_or_else(|| EngineError::config(format!("unknown categorical feature '{}'", name)))?;
            if categorical.contains(&field) {
                return Err(EngineError::config(format!("categorical feature '{}' listed twice", name)));
            }
            categorical.push(field);
        }

        if numeric.is_empty() && categorical.is_empty() {
            return Err(EngineError::config("feature spec selects no features"));
        }
        if !self.fill_value.is_finite() {
            return Err(EngineError::config("fill_value must be finite"));
        }
        Ok((numeric, categorical))
    }
}
