//! JSON document values.

use serde::{Deserialize, Serialize};
use terrastore_common::{Result, TerrastoreError};

/// A stored document: a JSON object payload.
///
/// Values arrive from the outside as raw bytes and are validated exactly once
/// at the service boundary; everything past that point can assume
/// well-formedness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(serde_json::Value);

impl Value {
    /// Parses and validates raw bytes into a document.
    ///
    /// The payload must be valid JSON with an object root; anything else is a
    /// [`TerrastoreError::Validation`] failure.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| TerrastoreError::Validation(format!("Invalid JSON value: {}", e)))?;
        Self::from_json(json)
    }

    /// Validates an already-parsed JSON value.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        if json.is_object() {
            Ok(Self(json))
        } else {
            Err(TerrastoreError::Validation(
                "Value must be a JSON object".to_string(),
            ))
        }
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    /// Looks up a dot-separated field path, e.g. `author.name`.
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}
