use thiserror::Error;

/// A record field that could not be coerced to its declared type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("schema error in field '{field}': {reason}")]
pub struct SchemaError {
    pub field: String,
    pub reason: String,
}

impl SchemaError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
