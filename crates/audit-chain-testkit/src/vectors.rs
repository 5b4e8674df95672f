//! Golden test vectors for the canonical encoding.
//!
//! These vectors pin the exact bytes an event canonicalizes to. If one of
//! them changes, every previously stored hash becomes unverifiable.

use audit_chain_core::{
    canonicalize, Action, AuditEvent, AuditLogEntry, ChainHash, ChainPosition, Resource, TenantId,
};
use serde_json::json;

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Builds the input event.
    pub event: fn() -> AuditEvent,
    /// Expected canonical event bytes (hex).
    pub expected_event_hex: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "minimal data event",
            event: || AuditEvent::for_action(Action::DataCreated, Resource::User, "u-1"),
            expected_event_hex: concat!(
                "a7",
                "0001",
                "01", "6f", "646174615f70726f63657373696e67",
                "02", "6c", "646174615f63726561746564",
                "03", "64", "75736572",
                "04", "63", "752d31",
                "07", "64", "696e666f",
                "08", "67", "73756363657373",
            ),
        },
        GoldenVector {
            name: "consent event with actor and details",
            event: || {
                AuditEvent::for_action(Action::ConsentGranted, Resource::ConsentRecord, "c-17")
                    .actor("user-4")
                    .detail("channel", "web")
                    .detail("ratio", json!(0.5))
                    .detail("dropped", serde_json::Value::Null)
            },
            expected_event_hex: concat!(
                "a9",
                "0001",
                "01", "72", "636f6e73656e745f6d616e6167656d656e74",
                "02", "6f", "636f6e73656e745f6772616e746564",
                "03", "6e", "636f6e73656e745f7265636f7264",
                "04", "64", "632d3137",
                "05", "66", "757365722d34",
                "07", "64", "696e666f",
                "08", "67", "73756363657373",
                // "ratio" sorts before "channel": shorter keys encode smaller.
                "09", "a2",
                "65", "726174696f", "68", "302e353030303030",
                "67", "6368616e6e656c", "63", "776562",
            ),
        },
    ]
}

/// Canonical event bytes for a vector, hex-encoded.
pub fn event_hex(vector: &GoldenVector) -> String {
    let canonical = canonicalize(&(vector.event)()).expect("golden vector must be valid");
    hex::encode(canonical.bytes())
}

/// Seal a vector as the genesis entry of a fixed tenant at a fixed time.
pub fn sealed_from_vector(vector: &GoldenVector) -> AuditLogEntry {
    let canonical = canonicalize(&(vector.event)()).expect("golden vector must be valid");
    let tenant = TenantId::new("golden").expect("valid tenant id");
    AuditLogEntry::seal(
        &tenant,
        &canonical,
        ChainPosition {
            sequence: 0,
            previous_hash: ChainHash::GENESIS,
            timestamp: 1_736_870_400_000,
        },
    )
}

/// Check every vector. Returns `(name, matches, actual_hex)`.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hex = event_hex(v);
            let matches = hex == v.expected_event_hex;
            (v.name.to_string(), matches, hex)
        })
        .collect()
}
