//! Named server-side update functions.
//!
//! `Update` commands carry a function name plus a parameter object; the owning
//! node applies the function to the current value under the key's
//! serialization. The registry ships the two built-ins.

use std::collections::HashMap;
use std::sync::Arc;

use terrastore_common::{ErrorMessage, Result, TerrastoreError};

use crate::value::Value;

/// A pure transformation of a stored value.
pub trait UpdateFunction: Send + Sync {
    fn apply(&self, key: &str, current: &Value, params: &serde_json::Value) -> Result<Value>;
}

pub const REPLACE: &str = "replace";
pub const MERGE: &str = "merge";

/// Registry of named update functions.
#[derive(Clone)]
pub struct UpdateFunctions {
    functions: HashMap<String, Arc<dyn UpdateFunction>>,
}

impl UpdateFunctions {
    pub fn new() -> Self {
        let mut functions: HashMap<String, Arc<dyn UpdateFunction>> = HashMap::new();
        functions.insert(REPLACE.to_string(), Arc::new(ReplaceFunction));
        functions.insert(MERGE.to_string(), Arc::new(MergeFunction));
        Self { functions }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn UpdateFunction>> {
        self.functions.get(name).cloned().ok_or_else(|| {
            TerrastoreError::Processing(ErrorMessage::new(
                ErrorMessage::BAD_REQUEST,
                format!("Unknown update function: {}", name),
            ))
        })
    }
}

impl Default for UpdateFunctions {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces the whole value with the parameter object.
struct ReplaceFunction;

impl UpdateFunction for ReplaceFunction {
    fn apply(&self, _key: &str, _current: &Value, params: &serde_json::Value) -> Result<Value> {
        Value::from_json(params.clone())
            .map_err(|_| bad_params("replace parameters must be a JSON object"))
    }
}

/// Shallow-merges the parameter object's fields into the current value;
/// parameter fields win on collision.
struct MergeFunction;

impl UpdateFunction for MergeFunction {
    fn apply(&self, _key: &str, current: &Value, params: &serde_json::Value) -> Result<Value> {
        let serde_json::Value::Object(updates) = params else {
            return Err(bad_params("merge parameters must be a JSON object"));
        };
        let mut merged = current.as_json().clone();
        let Some(target) = merged.as_object_mut() else {
            return Err(TerrastoreError::internal("Stored value lost its object root"));
        };
        for (field, value) in updates {
            target.insert(field.clone(), value.clone());
        }
        Value::from_json(merged).map_err(|e| TerrastoreError::internal(e.to_string()))
    }
}

fn bad_params(message: &str) -> TerrastoreError {
    TerrastoreError::Processing(ErrorMessage::new(ErrorMessage::BAD_REQUEST, message))
}
