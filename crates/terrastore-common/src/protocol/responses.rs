//! Command results and the correlated response envelope.

use crate::error::{ErrorMessage, Result, TerrastoreError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::commands::NodeAddress;

/// Tagged result union matching the command variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "payload")]
pub enum CommandResult {
    /// Plain acknowledgement for write commands.
    Ack,
    /// Bucket names, from `GetBuckets`.
    Buckets(HashSet<String>),
    /// Unordered keys, from `GetKeys`.
    Keys(HashSet<String>),
    /// Keys in comparator order, from `KeysInRange`.
    SortedKeys(Vec<String>),
    /// A single value, from `GetValue` and `Update`.
    Value(serde_json::Value),
    /// Key/value entries, from `GetValues` and `RemoveValues`.
    Values(HashMap<String, serde_json::Value>),
    /// Cluster members with addresses, from `Membership`.
    Members(Vec<NodeAddress>),
}

impl CommandResult {
    /// Unwraps an acknowledgement.
    pub fn into_ack(self) -> Result<()> {
        match self {
            CommandResult::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    pub fn into_buckets(self) -> Result<HashSet<String>> {
        match self {
            CommandResult::Buckets(buckets) => Ok(buckets),
            other => Err(unexpected("buckets", &other)),
        }
    }

    pub fn into_keys(self) -> Result<HashSet<String>> {
        match self {
            CommandResult::Keys(keys) => Ok(keys),
            other => Err(unexpected("keys", &other)),
        }
    }

    pub fn into_sorted_keys(self) -> Result<Vec<String>> {
        match self {
            CommandResult::SortedKeys(keys) => Ok(keys),
            other => Err(unexpected("sorted keys", &other)),
        }
    }

    pub fn into_value(self) -> Result<serde_json::Value> {
        match self {
            CommandResult::Value(value) => Ok(value),
            other => Err(unexpected("value", &other)),
        }
    }

    pub fn into_values(self) -> Result<HashMap<String, serde_json::Value>> {
        match self {
            CommandResult::Values(values) => Ok(values),
            other => Err(unexpected("values", &other)),
        }
    }

    pub fn into_members(self) -> Result<Vec<NodeAddress>> {
        match self {
            CommandResult::Members(members) => Ok(members),
            other => Err(unexpected("members", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &CommandResult) -> TerrastoreError {
    TerrastoreError::internal(format!("Expected {} result, got {:?}", expected, got))
}

/// Status byte of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Ok = 0,
    ProcessingError = 1,
    ValidationError = 2,
    ProtocolError = 3,
}

impl ResponseStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ResponseStatus::Ok),
            1 => Some(ResponseStatus::ProcessingError),
            2 => Some(ResponseStatus::ValidationError),
            3 => Some(ResponseStatus::ProtocolError),
            _ => None,
        }
    }
}

/// A correlated reply to a command frame.
///
/// The body holds a [`CommandResult`] on success and a structured
/// [`ErrorMessage`] otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub request_id: u64,
    pub status: ResponseStatus,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Result(CommandResult),
    Error(ErrorMessage),
}

impl ResponseEnvelope {
    pub fn success(request_id: u64, result: CommandResult) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Ok,
            body: ResponseBody::Result(result),
        }
    }

    pub fn failure(request_id: u64, error: &TerrastoreError) -> Self {
        let (status, message) = match error {
            TerrastoreError::Processing(msg) => (ResponseStatus::ProcessingError, msg.clone()),
            TerrastoreError::Validation(text) => (
                ResponseStatus::ValidationError,
                ErrorMessage::new(ErrorMessage::BAD_REQUEST, text.clone()),
            ),
            TerrastoreError::Protocol(text) => (
                ResponseStatus::ProtocolError,
                ErrorMessage::new(ErrorMessage::BAD_REQUEST, text.clone()),
            ),
            other => (
                ResponseStatus::ProcessingError,
                ErrorMessage::new(ErrorMessage::INTERNAL, other.to_string()),
            ),
        };
        Self {
            request_id,
            status,
            body: ResponseBody::Error(message),
        }
    }

    /// Converts the envelope back into the caller-facing result.
    pub fn into_result(self) -> Result<CommandResult> {
        match (self.status, self.body) {
            (ResponseStatus::Ok, ResponseBody::Result(result)) => Ok(result),
            (ResponseStatus::Ok, ResponseBody::Error(msg)) => Err(TerrastoreError::internal(
                format!("Ok status with error body: {}", msg),
            )),
            (ResponseStatus::ProcessingError, body) => {
                Err(TerrastoreError::Processing(body_message(body)))
            }
            (ResponseStatus::ValidationError, body) => {
                Err(TerrastoreError::Validation(body_message(body).message))
            }
            (ResponseStatus::ProtocolError, body) => {
                Err(TerrastoreError::Protocol(body_message(body).message))
            }
        }
    }
}

fn body_message(body: ResponseBody) -> ErrorMessage {
    match body {
        ResponseBody::Error(msg) => msg,
        ResponseBody::Result(result) => ErrorMessage::new(
            ErrorMessage::INTERNAL,
            format!("Error status with result body: {:?}", result),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_round_trip() {
        let envelope = ResponseEnvelope::success(42, CommandResult::Value(json!({"a": 1})));
        assert_eq!(envelope.status, ResponseStatus::Ok);
        let value = envelope.into_result().unwrap().into_value().unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_processing_failure_round_trip() {
        let error = TerrastoreError::Processing(ErrorMessage::not_found("no such key"));
        let envelope = ResponseEnvelope::failure(7, &error);
        assert_eq!(envelope.status, ResponseStatus::ProcessingError);
        assert_eq!(envelope.into_result().unwrap_err(), error);
    }

    #[test]
    fn test_validation_failure_status() {
        let error = TerrastoreError::Validation("not json".to_string());
        let envelope = ResponseEnvelope::failure(7, &error);
        assert_eq!(envelope.status, ResponseStatus::ValidationError);
        assert!(matches!(
            envelope.into_result(),
            Err(TerrastoreError::Validation(_))
        ));
    }

    #[test]
    fn test_transport_failure_maps_to_processing_status() {
        // A communication error raised while executing locally still has to
        // travel back as a processing failure; the transport classes only
        // describe this hop, not the remote one.
        let error = TerrastoreError::Communication("downstream reset".to_string());
        let envelope = ResponseEnvelope::failure(7, &error);
        assert_eq!(envelope.status, ResponseStatus::ProcessingError);
    }

    #[test]
    fn test_result_unwrap_mismatch() {
        let result = CommandResult::Ack;
        assert!(result.into_keys().is_err());
    }

    #[test]
    fn test_status_byte_round_trip() {
        for status in [
            ResponseStatus::Ok,
            ResponseStatus::ProcessingError,
            ResponseStatus::ValidationError,
            ResponseStatus::ProtocolError,
        ] {
            assert_eq!(ResponseStatus::from_byte(status as u8), Some(status));
        }
        assert_eq!(ResponseStatus::from_byte(9), None);
    }
}
