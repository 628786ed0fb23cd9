//! Named value conditions backing predicates.
//!
//! A predicate travels as `type:expression`; the executing node resolves the
//! type here and evaluates the expression against the stored value. Condition
//! resolution deliberately lives in the command layer rather than in each
//! service, so remote and local execution share one registry.

use std::collections::HashMap;
use std::sync::Arc;

use terrastore_common::{ErrorMessage, Result, TerrastoreError};

use crate::value::Value;

/// A boolean test over a stored value.
pub trait Condition: Send + Sync {
    fn is_satisfied(&self, key: &str, value: &Value, expression: &str) -> bool;
}

pub const VALUE_EQ: &str = "value-eq";
pub const FIELD_EQ: &str = "field-eq";

/// Registry of named conditions.
#[derive(Clone)]
pub struct Conditions {
    conditions: HashMap<String, Arc<dyn Condition>>,
}

impl Conditions {
    pub fn new() -> Self {
        let mut conditions: HashMap<String, Arc<dyn Condition>> = HashMap::new();
        conditions.insert(VALUE_EQ.to_string(), Arc::new(ValueEqCondition));
        conditions.insert(FIELD_EQ.to_string(), Arc::new(FieldEqCondition));
        Self { conditions }
    }

    /// Resolves a condition type; unknown types are a processing failure on
    /// the executing node.
    pub fn resolve(&self, condition_type: &str) -> Result<Arc<dyn Condition>> {
        self.conditions.get(condition_type).cloned().ok_or_else(|| {
            TerrastoreError::Processing(ErrorMessage::new(
                ErrorMessage::BAD_REQUEST,
                format!("Wrong condition type: {}", condition_type),
            ))
        })
    }
}

impl Default for Conditions {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole-value equality: the expression is a JSON literal compared against
/// the stored document.
struct ValueEqCondition;

impl Condition for ValueEqCondition {
    fn is_satisfied(&self, _key: &str, value: &Value, expression: &str) -> bool {
        match serde_json::from_str::<serde_json::Value>(expression) {
            Ok(expected) => value.as_json() == &expected,
            Err(_) => false,
        }
    }
}

/// Field equality: `path=literal`, with a dot-separated path into the
/// document. The literal is compared as JSON when it parses as JSON and as a
/// bare string otherwise.
struct FieldEqCondition;

impl Condition for FieldEqCondition {
    fn is_satisfied(&self, _key: &str, value: &Value, expression: &str) -> bool {
        let Some((path, literal)) = expression.split_once('=') else {
            return false;
        };
        let Some(actual) = value.field(path) else {
            return false;
        };
        match serde_json::from_str::<serde_json::Value>(literal) {
            Ok(expected) => actual == &expected,
            Err(_) => actual.as_str() == Some(literal),
        }
    }
}
