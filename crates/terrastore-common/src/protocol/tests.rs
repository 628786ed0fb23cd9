use super::*;
use crate::transport::codec;
use serde_json::json;
use std::collections::HashSet;

#[test]
fn test_command_kinds_are_stable() {
    // Kind numbers are wire-visible; changing one is a protocol break.
    assert_eq!(Command::GetBuckets.kind(), 1);
    assert_eq!(
        Command::GetKeys {
            bucket: "b".into()
        }
        .kind(),
        2
    );
    assert_eq!(Command::Membership.kind(), 11);
    assert!(Command::is_known_kind(1));
    assert!(Command::is_known_kind(11));
    assert!(!Command::is_known_kind(0));
    assert!(!Command::is_known_kind(12));
}

#[test]
fn test_request_round_trip() {
    let command = Command::PutValue {
        bucket: "books".into(),
        key: "dune".into(),
        value: json!({"author": "Herbert"}),
        predicate: None,
    };

    let encoded = codec::encode_request(99, &command).unwrap();
    let (request_id, decoded) = codec::decode_request(&encoded).unwrap();

    assert_eq!(request_id, 99);
    assert_eq!(decoded, command);
}

#[test]
fn test_request_with_predicate_round_trip() {
    let command = Command::GetValue {
        bucket: "books".into(),
        key: "dune".into(),
        predicate: Predicate::parse("field-eq:author=Herbert"),
    };

    let encoded = codec::encode_request(1, &command).unwrap();
    let (_, decoded) = codec::decode_request(&encoded).unwrap();
    assert_eq!(decoded, command);
}

#[test]
fn test_unknown_kind_is_protocol_error() {
    let command = Command::GetBuckets;
    let mut encoded = codec::encode_request(1, &command).unwrap();
    // Corrupt the kind field (bytes 8..10, big-endian).
    encoded[8] = 0xff;
    encoded[9] = 0xff;

    let err = codec::decode_request(&encoded).unwrap_err();
    assert!(matches!(err, crate::TerrastoreError::Protocol(_)));
}

#[test]
fn test_unknown_version_is_protocol_error() {
    let command = Command::GetBuckets;
    let mut encoded = codec::encode_request(1, &command).unwrap();
    // Corrupt the version field (bytes 10..12, big-endian).
    encoded[10] = 0xff;
    encoded[11] = 0xff;

    let err = codec::decode_request(&encoded).unwrap_err();
    assert!(matches!(err, crate::TerrastoreError::Protocol(_)));
}

#[test]
fn test_truncated_request_is_communication_error() {
    let err = codec::decode_request(&[0, 1, 2]).unwrap_err();
    assert!(matches!(err, crate::TerrastoreError::Communication(_)));
}

#[test]
fn test_response_round_trip() {
    let mut keys = HashSet::new();
    keys.insert("k1".to_string());
    keys.insert("k2".to_string());
    let envelope = ResponseEnvelope::success(7, CommandResult::Keys(keys.clone()));

    let encoded = codec::encode_response(&envelope).unwrap();
    let decoded = codec::decode_response(&encoded).unwrap();

    assert_eq!(decoded.request_id, 7);
    assert_eq!(decoded.into_result().unwrap().into_keys().unwrap(), keys);
}

#[test]
fn test_error_response_round_trip() {
    let error =
        crate::TerrastoreError::Processing(crate::ErrorMessage::not_found("missing key"));
    let envelope = ResponseEnvelope::failure(3, &error);

    let encoded = codec::encode_response(&envelope).unwrap();
    let decoded = codec::decode_response(&encoded).unwrap();

    assert_eq!(decoded.request_id, 3);
    assert_eq!(decoded.into_result().unwrap_err(), error);
}

#[test]
fn test_membership_result_round_trip() {
    let members = vec![
        NodeAddress::new("node-1", "10.0.0.1", 6200),
        NodeAddress::new("node-2", "10.0.0.2", 6200),
    ];
    let envelope = ResponseEnvelope::success(1, CommandResult::Members(members.clone()));

    let encoded = codec::encode_response(&envelope).unwrap();
    let decoded = codec::decode_response(&encoded).unwrap();
    assert_eq!(
        decoded.into_result().unwrap().into_members().unwrap(),
        members
    );
}

#[test]
fn test_predicate_parse() {
    let predicate = Predicate::parse("value-eq:{\"a\":1}").unwrap();
    assert_eq!(predicate.condition_type, "value-eq");
    assert_eq!(predicate.expression, "{\"a\":1}");

    assert!(Predicate::parse("no-separator").is_none());
    assert!(Predicate::parse(":empty-type").is_none());
}

#[test]
fn test_node_address_endpoint() {
    let addr = NodeAddress::new("node-1", "127.0.0.1", 6200);
    assert_eq!(addr.endpoint(), "127.0.0.1:6200");
}
