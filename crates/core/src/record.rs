use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SchemaError;

/// Typed field values. Records arrive as JSON, so numbers may show up as text
/// and any field may be null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Extract as string, returning None for non-text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Null and blank text both count as an absent value.
    pub fn is_missing(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

// ── Field catalogue ───────────────────────────────────────────

/// Numeric interaction metrics known to the feature pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    Csat,
    Ies,
    Complaints,
    AhtSeconds,
    HoldTimeSeconds,
    Transfers,
}

impl NumericField {
    pub const ALL: [NumericField; 6] = [
        NumericField::Csat,
        NumericField::Ies,
        NumericField::Complaints,
        NumericField::AhtSeconds,
        NumericField::HoldTimeSeconds,
        NumericField::Transfers,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NumericField::Csat => "csat",
            NumericField::Ies => "ies",
            NumericField::Complaints => "complaints",
            NumericField::AhtSeconds => "aht_seconds",
            NumericField::HoldTimeSeconds => "hold_time_seconds",
            NumericField::Transfers => "transfers",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Count fields only accept whole numbers.
    fn is_count(self) -> bool {
        matches!(self, NumericField::Complaints | NumericField::Transfers)
    }
}

impl fmt::Display for NumericField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Open-vocabulary categorical fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    Channel,
    Language,
    Queue,
}

impl CategoricalField {
    pub const ALL: [CategoricalField; 3] = [
        CategoricalField::Channel,
        CategoricalField::Language,
        CategoricalField::Queue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CategoricalField::Channel => "channel",
            CategoricalField::Language => "language",
            CategoricalField::Queue => "queue",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for CategoricalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Validated record ──────────────────────────────────────────

/// One customer interaction after schema validation.
///
/// Every metric is optional; absent values are imputed by the feature
/// pipeline, never rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub interaction_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub csat: Option<f64>,
    pub ies: Option<f64>,
    pub complaints: Option<i64>,
    pub aht_seconds: Option<f64>,
    pub hold_time_seconds: Option<f64>,
    pub transfers: Option<i64>,
    pub channel: Option<String>,
    pub language: Option<String>,
    pub queue: Option<String>,
}

impl InteractionRecord {
    pub fn new(interaction_id: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            ..Self::default()
        }
    }

    pub fn numeric(&self, field: NumericField) -> Option<f64> {
        match field {
            NumericField::Csat => self.csat,
            NumericField::Ies => self.ies,
            NumericField::Complaints => self.complaints.map(|v| v as f64),
            NumericField::AhtSeconds => self.aht_seconds,
            NumericField::HoldTimeSeconds => self.hold_time_seconds,
            NumericField::Transfers => self.transfers.map(|v| v as f64),
        }
    }

    pub fn categorical(&self, field: CategoricalField) -> Option<&str> {
        match field {
            CategoricalField::Channel => self.channel.as_deref(),
            CategoricalField::Language => self.language.as_deref(),
            CategoricalField::Queue => self.queue.as_deref(),
        }
    }

    fn set_numeric(&mut self, field: NumericField, value: Option<f64>) {
        match field {
            NumericField::Csat => self.csat = value,
            NumericField::Ies => self.ies = value,
            NumericField::Complaints => self.complaints = value.map(|v| v as i64),
            NumericField::AhtSeconds => self.aht_seconds = value,
            NumericField::HoldTimeSeconds => self.hold_time_seconds = value,
            NumericField::Transfers => self.transfers = value.map(|v| v as i64),
        }
    }

    fn set_categorical(&mut self, field: CategoricalField, value: Option<String>) {
        match field {
            CategoricalField::Channel => self.channel = value,
            CategoricalField::Language => self.language = value,
            CategoricalField::Queue => self.queue = value,
        }
    }
}

// ── Raw record ────────────────────────────────────────────────

/// An interaction as supplied by a caller: correlation id, optional timestamp,
/// and a flat map of loosely typed fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<FieldValue>,
    #[serde(flatten)]
    pub fields: HashMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new(interaction_id: impl Into<String>) -> Self {
        Self {
            interaction_id: Some(FieldValue::Text(interaction_id.into())),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(FieldValue::Text(timestamp.into()));
        self
    }

    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_owned(), value.into());
        self
    }

    /// Best-effort id for error reporting, even when validation fails.
    pub fn id_hint(&self) -> Option<String> {
        match self.interaction_id.as_ref()? {
            FieldValue::Text(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            FieldValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Coerce into a typed [`InteractionRecord`].
    ///
    /// Missing values are legal. A value that is present but cannot be read as
    /// its declared type is a [`SchemaError`].
    pub fn validate(&self) -> Result<InteractionRecord, SchemaError> {
        let interaction_id = self
            .id_hint()
            .ok_or_else(|| SchemaError::new("interaction_id", "missing or empty"))?;

        let mut record = InteractionRecord::new(interaction_id);
        record.timestamp = match &self.timestamp {
            None => None,
            Some(v) if v.is_missing() => None,
            Some(FieldValue::Text(s)) => Some(parse_timestamp(s)?),
            Some(other) => {
                return Err(SchemaError::new(
                    "timestamp",
                    format!("expected ISO-8601 text, got {:?}", other),
                ))
            }
        };

        for field in NumericField::ALL {
            let value = coerce_numeric(field, self.fields.get(field.name()))?;
            record.set_numeric(field, value);
        }
        for field in CategoricalField::ALL {
            let value = coerce_categorical(field, self.fields.get(field.name()))?;
            record.set_categorical(field, value);
        }

        for key in self.fields.keys() {
            if NumericField::from_name(key).is_none() && CategoricalField::from_name(key).is_none() {
                debug!(field = %key, interaction_id = %record.interaction_id, "ignoring unknown field");
            }
        }

        Ok(record)
    }
}

fn coerce_numeric(field: NumericField, value: Option<&FieldValue>) -> Result<Option<f64>, SchemaError> {
    let number = match value {
        None => return Ok(None),
        Some(v) if v.is_missing() => return Ok(None),
        Some(FieldValue::Integer(i)) => *i as f64,
        Some(FieldValue::Float(f)) => *f,
        Some(FieldValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| {
            SchemaError::new(field.name(), format!("'{}' is not a number", s))
        })?,
        Some(FieldValue::Boolean(b)) => {
            return Err(SchemaError::new(field.name(), format!("expected a number, got boolean {}", b)))
        }
        Some(FieldValue::Null) => return Ok(None),
    };

    if !number.is_finite() {
        return Err(SchemaError::new(field.name(), "value must be finite"));
    }
    if field.is_count() {
        if number.fract() != 0.0 {
            return Err(SchemaError::new(
                field.name(),
                format!("expected a whole count, got {}", number),
            ));
        }
        // i64::MAX as f64 rounds up to 2^63, which no i64 holds.
        if number < 0.0 || number >= i64::MAX as f64 {
            return Err(SchemaError::new(
                field.name(),
                format!("count out of range: {}", number),
            ));
        }
    }
    Ok(Some(number))
}

fn coerce_categorical(
    field: CategoricalField,
    value: Option<&FieldValue>,
) -> Result<Option<String>, SchemaError> {
    match value {
        None => Ok(None),
        Some(v) if v.is_missing() => Ok(None),
        Some(FieldValue::Text(s)) => Ok(Some(s.trim().to_owned())),
        Some(FieldValue::Integer(i)) => Ok(Some(i.to_string())),
        Some(FieldValue::Float(f)) => Ok(Some(f.to_string())),
        Some(FieldValue::Boolean(b)) => Err(SchemaError::new(
            field.name(),
            format!("expected text, got boolean {}", b),
        )),
        Some(FieldValue::Null) => Ok(None),
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse RFC 3339, falling back to naive formats interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SchemaError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(SchemaError::new(
        "timestamp",
        format!("unable to parse timestamp '{}'", raw),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_full_record() {
        let raw = RawRecord::new("abc-123")
            .with_timestamp("2025-10-15T10:00:00Z")
            .with("csat", 3.2)
            .with("ies", 64)
            .with("complaints", 1)
            .with("aht_seconds", "420.5")
            .with("transfers", 0)
            .with("channel", " voice ")
            .with("queue", "billing");

        let record = raw.validate().unwrap();
        assert_eq!(record.interaction_id, "abc-123");
        assert_eq!(record.csat, Some(3.2));
        assert_eq!(record.ies, Some(64.0));
        assert_eq!(record.complaints, Some(1));
        assert_eq!(record.aht_seconds, Some(420.5));
        assert_eq!(record.hold_time_seconds, None);
        assert_eq!(record.channel.as_deref(), Some("voice"));
        assert_eq!(record.language, None);
        assert!(record.timestamp.is_some());
    }

    #[test]
    fn missing_values_are_legal() {
        let raw = RawRecord::new("x")
            .with("csat", FieldValue::Null)
            .with("ies", "")
            .with("channel", FieldValue::Null);
        let record = raw.validate().unwrap();
        assert_eq!(record.csat, None);
        assert_eq!(record.ies, None);
        assert_eq!(record.channel, None);
    }

    #[test]
    fn non_numeric_text_is_schema_error() {
        let err = RawRecord::new("x").with("aht_seconds", "slow").validate().unwrap_err();
        assert_eq!(err.field, "aht_seconds");
    }

    #[test]
    fn boolean_metric_is_schema_error() {
        let err = RawRecord::new("x").with("csat", true).validate().unwrap_err();
        assert_eq!(err.field, "csat");
    }

    #[test]
    fn fractional_count_is_schema_error() {
        let err = RawRecord::new("x").with("transfers", 1.5).validate().unwrap_err();
        assert_eq!(err.field, "transfers");
        let ok = RawRecord::new("x").with("transfers", 2.0).validate().unwrap();
        assert_eq!(ok.transfers, Some(2));
    }

    #[test]
    fn negative_or_huge_count_is_schema_error() {
        let err = RawRecord::new("x").with("complaints", -3).validate().unwrap_err();
        assert_eq!(err.field, "complaints");
        let err = RawRecord::new("x").with("transfers", "-1").validate().unwrap_err();
        assert_eq!(err.field, "transfers");
        let err = RawRecord::new("x").with("transfers", 1e200).validate().unwrap_err();
        assert_eq!(err.field, "transfers");
        let ok = RawRecord::new("x").with("complaints", 0).validate().unwrap();
        assert_eq!(ok.complaints, Some(0));
    }

    #[test]
    fn non_finite_is_schema_error() {
        let err = RawRecord::new("x").with("ies", f64::NAN).validate().unwrap_err();
        assert_eq!(err.field, "ies");
    }

    #[test]
    fn missing_id_is_schema_error() {
        let raw = RawRecord::default().with("csat", 4.0);
        let err = raw.validate().unwrap_err();
        assert_eq!(err.field, "interaction_id");
    }

    #[test]
    fn metric_ranges_are_not_enforced() {
        let record = RawRecord::new("x").with("csat", 85).validate().unwrap();
        assert_eq!(record.csat, Some(85.0));
        let record = RawRecord::new("x").with("aht_seconds", -10.0).validate().unwrap();
        assert_eq!(record.aht_seconds, Some(-10.0));
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2025-01-01T10:00:00Z").is_ok());
        assert!(parse_timestamp("2025-01-01T10:00:00+02:00").is_ok());
        assert!(parse_timestamp("2025-01-01 10:00:00").is_ok());
        assert!(parse_timestamp("2025-01-01T10:00:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn deserialize_flat_json() {
        let json = r#"{
            "interaction_id": "i-1",
            "timestamp": "2025-01-01T10:00:00Z",
            "csat": 1,
            "ies": 20.5,
            "channel": "voice",
            "language": null,
            "agent_notes": "ignored"
        }"#;
        let raw: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(raw.id_hint().as_deref(), Some("i-1"));
        assert_eq!(raw.fields.get("csat"), Some(&FieldValue::Integer(1)));

        let record = raw.validate().unwrap();
        assert_eq!(record.csat, Some(1.0));
        assert_eq!(record.ies, Some(20.5));
        assert_eq!(record.language, None);
    }

    #[test]
    fn field_names_round_trip() {
        for f in NumericField::ALL {
            assert_eq!(NumericField::from_name(f.name()), Some(f));
        }
        for f in CategoricalField::ALL {
            assert_eq!(CategoricalField::from_name(f.name()), Some(f));
        }
        assert_eq!(NumericField::from_name("nope"), None);
    }
}
