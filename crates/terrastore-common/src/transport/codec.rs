//! Envelope codec shared by both ends of a node connection.
//!
//! Bodies are JSON (self-describing, so older readers can skip fields added
//! by newer writers); the envelope header is fixed-width big-endian.

use crate::error::{Result, TerrastoreError};
use crate::protocol::commands::{Command, PROTOCOL_VERSION};
use crate::protocol::responses::{ResponseBody, ResponseEnvelope, ResponseStatus};

const REQUEST_HEADER_LEN: usize = 8 + 2 + 2;
const RESPONSE_HEADER_LEN: usize = 8 + 1;

/// Encodes a request payload: `request_id | kind | version | body`.
pub fn encode_request(request_id: u64, command: &Command) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(command)
        .map_err(|e| TerrastoreError::internal(format!("Encode error: {}", e)))?;

    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + body.len());
    frame.extend_from_slice(&request_id.to_be_bytes());
    frame.extend_from_slice(&command.kind().to_be_bytes());
    frame.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a request payload into its correlation id and command.
///
/// An unrecognised kind or version is a [`TerrastoreError::Protocol`] failure;
/// a truncated or garbled frame is a communication failure.
pub fn decode_request(payload: &[u8]) -> Result<(u64, Command)> {
    if payload.len() < REQUEST_HEADER_LEN {
        return Err(TerrastoreError::Communication(format!(
            "Truncated request frame: {} bytes",
            payload.len()
        )));
    }

    let request_id = u64::from_be_bytes(payload[0..8].try_into().expect("length checked"));
    let kind = u16::from_be_bytes(payload[8..10].try_into().expect("length checked"));
    let version = u16::from_be_bytes(payload[10..12].try_into().expect("length checked"));

    if version != PROTOCOL_VERSION {
        return Err(TerrastoreError::Protocol(format!(
            "Unsupported protocol version {} (expected {})",
            version, PROTOCOL_VERSION
        )));
    }
    if !Command::is_known_kind(kind) {
        return Err(TerrastoreError::Protocol(format!(
            "Unknown command kind {}",
            kind
        )));
    }

    let command: Command = serde_json::from_slice(&payload[REQUEST_HEADER_LEN..])?;
    if command.kind() != kind {
        return Err(TerrastoreError::Protocol(format!(
            "Kind mismatch: header says {}, body decodes as {}",
            kind,
            command.kind()
        )));
    }
    Ok((request_id, command))
}

/// Encodes a response payload: `request_id | status | body`.
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(&envelope.body)
        .map_err(|e| TerrastoreError::internal(format!("Encode error: {}", e)))?;

    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + body.len());
    frame.extend_from_slice(&envelope.request_id.to_be_bytes());
    frame.push(envelope.status as u8);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a response payload.
pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope> {
    if payload.len() < RESPONSE_HEADER_LEN {
        return Err(TerrastoreError::Communication(format!(
            "Truncated response frame: {} bytes",
            payload.len()
        )));
    }

    let request_id = u64::from_be_bytes(payload[0..8].try_into().expect("length checked"));
    let status = ResponseStatus::from_byte(payload[8]).ok_or_else(|| {
        TerrastoreError::Protocol(format!("Unknown response status {}", payload[8]))
    })?;
    let body: ResponseBody = serde_json::from_slice(&payload[RESPONSE_HEADER_LEN..])?;

    Ok(ResponseEnvelope {
        request_id,
        status,
        body,
    })
}
