//! Canonical CBOR encoding for audit events.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats: detail floats become fixed-precision text
//!
//! Two layers are encoded. The *event* map holds the semantic fields and the
//! schema version. The *payload* envelope wraps the event bytes together with
//! the tenant, chain position and commit time; the envelope is what gets
//! hashed and stored as `canonical_payload`.
//!
//! Changing any rule here invalidates every stored hash, which is why each
//! entry carries the schema version it was encoded under.

use bytes::Bytes;
use ciborium::value::{Integer, Value};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, MalformedEventError};
use crate::event::{AuditEvent, Details};
use crate::taxonomy::{Action, Category, Outcome, Resource, Severity, TAXONOMY_SCHEMA_VERSION};

/// Maximum byte length of `resource_id`, `actor_id` and `correlation_id`.
pub const MAX_FIELD_LEN: usize = 512;

/// Maximum nesting depth of the details map.
pub const MAX_DETAIL_DEPTH: usize = 16;

/// Fractional digits used when rendering floats.
pub const FLOAT_PRECISION: usize = 6;

/// Event field keys (integer keys for compact encoding).
mod event_keys {
    pub const SCHEMA_VERSION: u64 = 0;
    pub const CATEGORY: u64 = 1;
    pub const ACTION: u64 = 2;
    pub const RESOURCE: u64 = 3;
    pub const RESOURCE_ID: u64 = 4;
    pub const ACTOR_ID: u64 = 5;
    pub const CORRELATION_ID: u64 = 6;
    pub const SEVERITY: u64 = 7;
    pub const OUTCOME: u64 = 8;
    pub const DETAILS: u64 = 9;
}

/// Payload envelope keys.
mod envelope_keys {
    pub const SCHEMA_VERSION: u64 = 0;
    pub const TENANT_ID: u64 = 1;
    pub const SEQUENCE: u64 = 2;
    pub const TIMESTAMP: u64 = 3;
    pub const EVENT: u64 = 4;
}

/// A validated event together with its canonical bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    event: AuditEvent,
    schema_version: u16,
    bytes: Bytes,
}

impl CanonicalEvent {
    /// The validated event.
    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    /// The schema version the bytes were produced under.
    pub fn schema_version(&self) -> u16 {
        self.schema_version
    }

    /// The canonical event bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// Decoded payload envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEnvelope {
    pub schema_version: u16,
    pub tenant_id: String,
    pub sequence: u64,
    pub timestamp: i64,
    pub event: Bytes,
}

/// Validate an event and encode it canonically.
pub fn canonicalize(event: &AuditEvent) -> Result<CanonicalEvent, MalformedEventError> {
    if event.action.category() != event.category {
        return Err(MalformedEventError::ActionNotInCategory {
            action: event.action.as_str().to_string(),
            category: event.category.as_str().to_string(),
        });
    }

    check_text("resource_id", &event.resource_id)?;
    if let Some(actor) = &event.actor_id {
        check_text("actor_id", actor)?;
    }
    if let Some(correlation) = &event.correlation_id {
        check_text("correlation_id", correlation)?;
    }

    let details = details_to_cbor(&event.details, 0)?;
    let value = event_to_cbor_value(event, TAXONOMY_SCHEMA_VERSION, details);

    Ok(CanonicalEvent {
        event: event.clone(),
        schema_version: TAXONOMY_SCHEMA_VERSION,
        bytes: Bytes::from(encode_cbor_value_canonical(&value)),
    })
}

/// Wrap canonical event bytes with the chain position that will be hashed.
pub fn seal_payload(tenant_id: &str, sequence: u64, timestamp: i64, event: &CanonicalEvent) -> Vec<u8> {
    let entries = vec![
        (
            uint_key(envelope_keys::SCHEMA_VERSION),
            Value::Integer(event.schema_version.into()),
        ),
        (uint_key(envelope_keys::TENANT_ID), Value::Text(tenant_id.to_string())),
        (uint_key(envelope_keys::SEQUENCE), Value::Integer(sequence.into())),
        (uint_key(envelope_keys::TIMESTAMP), Value::Integer(timestamp.into())),
        (uint_key(envelope_keys::EVENT), Value::Bytes(event.bytes.to_vec())),
    ];
    encode_cbor_value_canonical(&Value::Map(entries))
}

/// Decode a payload envelope from stored bytes.
pub fn open_payload(bytes: &[u8]) -> Result<PayloadEnvelope, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    let map = as_map(&value)?;

    let schema_version = get_uint(map, envelope_keys::SCHEMA_VERSION, "schema_version")?;
    let schema_version = u16::try_from(schema_version)
        .map_err(|_| CoreError::MalformedPayload("schema_version out of range".into()))?;

    let tenant_id = match get(map, envelope_keys::TENANT_ID) {
        Some(Value::Text(s)) => s.clone(),
        _ => return Err(CoreError::MalformedPayload("invalid tenant_id".into())),
    };

    let sequence = get_uint(map, envelope_keys::SEQUENCE, "sequence")?;

    let timestamp = match get(map, envelope_keys::TIMESTAMP) {
        Some(Value::Integer(i)) => i64::try_from(i128::from(*i))
            .map_err(|_| CoreError::MalformedPayload("timestamp out of range".into()))?,
        _ => return Err(CoreError::MalformedPayload("missing timestamp".into())),
    };

    let event = match get(map, envelope_keys::EVENT) {
        Some(Value::Bytes(b)) => Bytes::from(b.clone()),
        _ => return Err(CoreError::MalformedPayload("missing event".into())),
    };

    Ok(PayloadEnvelope {
        schema_version,
        tenant_id,
        sequence,
        timestamp,
        event,
    })
}

/// Decode canonical event bytes back into an event.
///
/// Detail floats come back as the fixed-precision text they were encoded as.
pub fn decode_event(bytes: &[u8]) -> Result<(u16, AuditEvent), CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    let map = as_map(&value)?;

    let schema_version = get_uint(map, event_keys::SCHEMA_VERSION, "schema_version")?;
    let schema_version = u16::try_from(schema_version)
        .map_err(|_| CoreError::MalformedPayload("schema_version out of range".into()))?;

    let text = |key: u64, name: &str| -> Result<String, CoreError> {
        match get(map, key) {
            Some(Value::Text(s)) => Ok(s.clone()),
            _ => Err(CoreError::MalformedPayload(format!("invalid {}", name))),
        }
    };
    let optional_text = |key: u64, name: &str| -> Result<Option<String>, CoreError> {
        match get(map, key) {
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            None => Ok(None),
            _ => Err(CoreError::MalformedPayload(format!("invalid {}", name))),
        }
    };
    let vocab = |e: crate::error::MalformedEventError| CoreError::MalformedPayload(e.to_string());

    let details = match get(map, event_keys::DETAILS) {
        Some(Value::Map(entries)) => {
            let mut details = Details::new();
            for (k, v) in entries {
                let Value::Text(key) = k else {
                    return Err(CoreError::MalformedPayload("non-text detail key".into()));
                };
                details.insert(key.clone(), cbor_to_json(v)?);
            }
            details
        }
        None => Details::new(),
        _ => return Err(CoreError::MalformedPayload("invalid details".into())),
    };

    let event = AuditEvent {
        category: Category::parse(&text(event_keys::CATEGORY, "category")?).map_err(vocab)?,
        action: Action::parse(&text(event_keys::ACTION, "action")?).map_err(vocab)?,
        resource: Resource::parse(&text(event_keys::RESOURCE, "resource")?).map_err(vocab)?,
        resource_id: text(event_keys::RESOURCE_ID, "resource_id")?,
        actor_id: optional_text(event_keys::ACTOR_ID, "actor_id")?,
        correlation_id: optional_text(event_keys::CORRELATION_ID, "correlation_id")?,
        severity: Severity::parse(&text(event_keys::SEVERITY, "severity")?).map_err(vocab)?,
        outcome: Outcome::parse(&text(event_keys::OUTCOME, "outcome")?).map_err(vocab)?,
        details,
    };

    Ok((schema_version, event))
}

fn check_text(field: &'static str, value: &str) -> Result<(), MalformedEventError> {
    if value.trim().is_empty() {
        return Err(MalformedEventError::EmptyField(field));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(MalformedEventError::FieldTooLong {
            field,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

fn uint_key(key: u64) -> Value {
    Value::Integer(key.into())
}

/// Convert an event to a CBOR Value (map with integer keys).
///
/// Absent optional fields are left out of the map entirely, and so is an
/// empty details map.
fn event_to_cbor_value(event: &AuditEvent, schema_version: u16, details: Option<Value>) -> Value {
    let mut entries = Vec::with_capacity(10);

    entries.push((
        uint_key(event_keys::SCHEMA_VERSION),
        Value::Integer(schema_version.into()),
    ));
    entries.push((
        uint_key(event_keys::CATEGORY),
        Value::Text(event.category.as_str().into()),
    ));
    entries.push((
        uint_key(event_keys::ACTION),
        Value::Text(event.action.as_str().into()),
    ));
    entries.push((
        uint_key(event_keys::RESOURCE),
        Value::Text(event.resource.as_str().into()),
    ));
    entries.push((
        uint_key(event_keys::RESOURCE_ID),
        Value::Text(event.resource_id.clone()),
    ));
    if let Some(actor) = &event.actor_id {
        entries.push((uint_key(event_keys::ACTOR_ID), Value::Text(actor.clone())));
    }
    if let Some(correlation) = &event.correlation_id {
        entries.push((
            uint_key(event_keys::CORRELATION_ID),
            Value::Text(correlation.clone()),
        ));
    }
    entries.push((
        uint_key(event_keys::SEVERITY),
        Value::Text(event.severity.as_str().into()),
    ));
    entries.push((
        uint_key(event_keys::OUTCOME),
        Value::Text(event.outcome.as_str().into()),
    ));
    if let Some(details) = details {
        entries.push((uint_key(event_keys::DETAILS), details));
    }

    Value::Map(entries)
}

/// Convert the details map, dropping nulls. Returns `None` when nothing is
/// left, so `{}` and `{"a": null}` encode like no details at all.
fn details_to_cbor(details: &Details, depth: usize) -> Result<Option<Value>, MalformedEventError> {
    let mut entries = Vec::with_capacity(details.len());
    for (key, value) in details {
        if key.is_empty() {
            return Err(MalformedEventError::EmptyDetailKey);
        }
        if let Some(v) = json_to_cbor(key, value, depth + 1)? {
            entries.push((Value::Text(key.clone()), v));
        }
    }
    Ok((!entries.is_empty()).then_some(Value::Map(entries)))
}

fn json_to_cbor(
    key: &str,
    value: &JsonValue,
    depth: usize,
) -> Result<Option<Value>, MalformedEventError> {
    if depth > MAX_DETAIL_DEPTH {
        return Err(MalformedEventError::DetailsTooDeep {
            max: MAX_DETAIL_DEPTH,
        });
    }

    let converted = match value {
        JsonValue::Null => return Ok(None),
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Value::Text(render_float(key, f)?)
            }
        }
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Array(items) => {
            // Positions are significant inside arrays, so nulls stay.
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_to_cbor(key, item, depth + 1)?.unwrap_or(Value::Null));
            }
            Value::Array(out)
        }
        JsonValue::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                if k.is_empty() {
                    return Err(MalformedEventError::EmptyDetailKey);
                }
                if let Some(v) = json_to_cbor(k, v, depth + 1)? {
                    entries.push((Value::Text(k.clone()), v));
                }
            }
            Value::Map(entries)
        }
    };

    Ok(Some(converted))
}

fn render_float(key: &str, f: f64) -> Result<String, MalformedEventError> {
    if !f.is_finite() {
        return Err(MalformedEventError::NonFiniteNumber {
            key: key.to_string(),
        });
    }
    // -0.0 and 0.0 are the same logical value.
    let f = if f == 0.0 { 0.0 } else { f };
    Ok(format!("{:.*}", FLOAT_PRECISION, f))
}

fn cbor_to_json(value: &Value) -> Result<JsonValue, CoreError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(i) => {
            let n = i128::from(*i);
            if let Ok(v) = i64::try_from(n) {
                JsonValue::from(v)
            } else if let Ok(v) = u64::try_from(n) {
                JsonValue::from(v)
            } else {
                return Err(CoreError::MalformedPayload("integer out of range".into()));
            }
        }
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Array(items) => JsonValue::Array(
            items.iter().map(cbor_to_json).collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            let mut map = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                let Value::Text(key) = k else {
                    return Err(CoreError::MalformedPayload("non-text detail key".into()));
                };
                map.insert(key.clone(), cbor_to_json(v)?);
            }
            JsonValue::Object(map)
        }
        _ => return Err(CoreError::MalformedPayload("unsupported detail value".into())),
    })
}

fn as_map(value: &Value) -> Result<&[(Value, Value)], CoreError> {
    match value {
        Value::Map(m) => Ok(m),
        _ => Err(CoreError::MalformedPayload("expected map".into())),
    }
}

fn get(map: &[(Value, Value)], key: u64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
        .map(|(_, v)| v)
}

fn get_uint(map: &[(Value, Value)], key: u64, name: &str) -> Result<u64, CoreError> {
    match get(map, key) {
        Some(Value::Integer(i)) => u64::try_from(i128::from(*i))
            .map_err(|_| CoreError::MalformedPayload(format!("{} out of range", name))),
        _ => Err(CoreError::MalformedPayload(format!("missing {}", name))),
    }
}

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        // Never produced by this module; encoded as fixed-precision text so
        // the encoder stays total.
        Value::Float(f) => encode_text(buf, &format!("{:.*}", FLOAT_PRECISION, f)),
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        _ => buf.push(0xf7),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n = i128::from(i);

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison. Duplicate encoded keys
/// keep the last value, matching JSON object semantics.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    // Stable sort keeps insertion order among equal keys; dedup then keeps the last.
    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut deduped: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(key_value_pairs.len());
    for pair in key_value_pairs {
        match deduped.last_mut() {
            Some(last) if last.0 == pair.0 => *last = pair,
            _ => deduped.push(pair),
        }
    }

    encode_uint(buf, 5, deduped.len() as u64);
    for (key_bytes, value) in deduped {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> AuditEvent {
        AuditEvent::for_action(Action::ConsentWithdrawn, Resource::ConsentRecord, "consent-17")
            .actor("user-9")
            .severity(Severity::Medium)
            .detail("channel", "web")
            .detail("purposes", json!(["marketing", "analytics"]))
    }

    #[test]
    fn test_canonical_encoding_deterministic() {
        let a = canonicalize(&sample()).unwrap();
        let b = canonicalize(&sample()).unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_eq!(a.schema_version(), TAXONOMY_SCHEMA_VERSION);
    }

    #[test]
    fn test_detail_order_does_not_matter() {
        let mut nested_a = serde_json::Map::new();
        nested_a.insert("z".into(), json!(1));
        nested_a.insert("a".into(), json!(2));
        let nested_b: serde_json::Map<String, JsonValue> =
            [("a".to_string(), json!(2)), ("z".to_string(), json!(1))].into_iter().collect();

        let a = sample().detail("nested", JsonValue::Object(nested_a));
        let b = sample().detail("nested", JsonValue::Object(nested_b));
        assert_eq!(canonicalize(&a).unwrap().bytes(), canonicalize(&b).unwrap().bytes());
    }

    #[test]
    fn test_null_details_equal_absent() {
        let plain = AuditEvent::for_action(Action::Logout, Resource::Session, "s-1");
        let with_null = plain.clone().detail("reason", JsonValue::Null);
        assert_eq!(
            canonicalize(&plain).unwrap().bytes(),
            canonicalize(&with_null).unwrap().bytes()
        );
    }

    #[test]
    fn test_floats_fixed_precision() {
        let a = sample().detail("score", 0.1 + 0.2);
        let b = sample().detail("score", "0.300000");
        // Floats render as text, so they collide with the equivalent string.
        assert_eq!(canonicalize(&a).unwrap().bytes(), canonicalize(&b).unwrap().bytes());

        let neg_zero = sample().detail("delta", -0.0);
        let zero = sample().detail("delta", 0.0);
        assert_eq!(
            canonicalize(&neg_zero).unwrap().bytes(),
            canonicalize(&zero).unwrap().bytes()
        );
    }

    #[test]
    fn test_category_mismatch_rejected() {
        let mut event = sample();
        event.category = Category::BreachResponse;
        assert!(matches!(
            canonicalize(&event),
            Err(MalformedEventError::ActionNotInCategory { .. })
        ));
    }

    #[test]
    fn test_empty_fields_rejected() {
        let event = AuditEvent::for_action(Action::Logout, Resource::Session, "  ");
        assert_eq!(
            canonicalize(&event).unwrap_err(),
            MalformedEventError::EmptyField("resource_id")
        );

        let event = sample().detail("", 1);
        assert_eq!(canonicalize(&event).unwrap_err(), MalformedEventError::EmptyDetailKey);
    }

    #[test]
    fn test_deep_details_rejected() {
        let mut value = json!(1);
        for _ in 0..(MAX_DETAIL_DEPTH + 1) {
            value = json!({ "inner": value });
        }
        let event = sample().detail("deep", value);
        assert!(matches!(
            canonicalize(&event),
            Err(MalformedEventError::DetailsTooDeep { .. })
        ));
    }

    #[test]
    fn test_decode_event_roundtrip() {
        let event = sample().correlation("case-3");
        let canonical = canonicalize(&event).unwrap();
        let (version, decoded) = decode_event(canonical.bytes()).unwrap();
        assert_eq!(version, TAXONOMY_SCHEMA_VERSION);
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_payload_envelope_roundtrip() {
        let canonical = canonicalize(&sample()).unwrap();
        let payload = seal_payload("tenant-a", 42, 1_736_870_400_000, &canonical);
        let envelope = open_payload(&payload).unwrap();

        assert_eq!(envelope.tenant_id, "tenant-a");
        assert_eq!(envelope.sequence, 42);
        assert_eq!(envelope.timestamp, 1_736_870_400_000);
        assert_eq!(envelope.schema_version, TAXONOMY_SCHEMA_VERSION);
        assert_eq!(&envelope.event, canonical.bytes());
    }

    #[test]
    fn test_payload_binds_position() {
        let canonical = canonicalize(&sample()).unwrap();
        let a = seal_payload("tenant-a", 1, 1000, &canonical);
        let b = seal_payload("tenant-a", 2, 1000, &canonical);
        let c = seal_payload("tenant-b", 1, 1000, &canonical);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_integer(&mut buf, (-1i64).into());
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (Value::Integer(8.into()), Value::Integer(80.into())),
            (Value::Integer(0.into()), Value::Integer(0.into())),
            (Value::Integer(5.into()), Value::Integer(50.into())),
        ];
        encode_map_canonical(&mut buf, &entries);

        assert_eq!(buf[0], 0xa3);
        assert_eq!(buf[1], 0x00);
        assert_eq!(buf[3], 0x05);
        assert_eq!(buf[6], 0x08);
    }

    #[test]
    fn test_garbage_payload_rejected() {
        assert!(open_payload(&[0xff, 0x00, 0x13]).is_err());
        assert!(open_payload(&[0x01]).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn detail_value() -> impl Strategy<Value = JsonValue> {
            prop_oneof![
                any::<i64>().prop_map(JsonValue::from),
                any::<bool>().prop_map(JsonValue::from),
                "[a-z0-9 ]{0,16}".prop_map(JsonValue::from),
            ]
        }

        proptest! {
            #[test]
            fn canonical_bytes_decode_to_same_event(
                details in prop::collection::btree_map("[a-z_]{1,8}", detail_value(), 0..8),
                resource_id in "[a-z0-9-]{1,24}",
            ) {
                let event = AuditEvent::for_action(Action::DataExported, Resource::Report, resource_id)
                    .details(details);
                let first = canonicalize(&event).unwrap();
                let second = canonicalize(&event.clone()).unwrap();
                prop_assert_eq!(first.bytes(), second.bytes());

                let (_, decoded) = decode_event(first.bytes()).unwrap();
                prop_assert_eq!(decoded, event);
            }
        }
    }
}
