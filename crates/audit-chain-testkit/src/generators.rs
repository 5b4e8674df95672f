//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::Value as JsonValue;

use audit_chain_core::{
    Action, AuditEvent, ChainHash, Details, EntryId, Outcome, Resource, Severity, TenantId,
};

/// Generate a random EntryId.
pub fn entry_id() -> impl Strategy<Value = EntryId> {
    any::<[u8; 16]>().prop_map(EntryId::from_bytes)
}

/// Generate a random ChainHash.
pub fn chain_hash() -> impl Strategy<Value = ChainHash> {
    any::<[u8; 32]>().prop_map(ChainHash::from_bytes)
}

/// Generate a valid tenant id.
pub fn tenant_id() -> impl Strategy<Value = TenantId> {
    "[a-z][a-z0-9-]{0,31}".prop_map(|s| TenantId::new(s).expect("valid tenant id"))
}

pub fn action() -> impl Strategy<Value = Action> {
    prop::sample::select(Action::ALL)
}

pub fn resource() -> impl Strategy<Value = Resource> {
    prop::sample::select(Resource::ALL)
}

pub fn severity() -> impl Strategy<Value = Severity> {
    prop::sample::select(Severity::ALL)
}

pub fn outcome() -> impl Strategy<Value = Outcome> {
    prop::sample::select(Outcome::ALL)
}

/// A non-blank identifier within the field length limit.
pub fn identifier() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9_.:-]{0,63}".prop_map(String::from)
}

/// A JSON detail value, nested a few levels deep. Floats are finite.
pub fn detail_value() -> impl Strategy<Value = JsonValue> {
    let leaf = prop_oneof![
        Just(JsonValue::Null),
        any::<bool>().prop_map(JsonValue::Bool),
        any::<i64>().prop_map(JsonValue::from),
        (-1.0e9f64..1.0e9f64).prop_map(JsonValue::from),
        "[ -~]{0,24}".prop_map(JsonValue::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m| JsonValue::Object(m.into_iter().collect())),
        ]
    })
}

/// A details map with non-empty keys.
pub fn details() -> impl Strategy<Value = Details> {
    prop::collection::btree_map("[a-z_]{1,12}", detail_value(), 0..6)
}

/// Parameters for generating a valid event.
#[derive(Debug, Clone)]
pub struct EventParams {
    pub action: Action,
    pub resource: Resource,
    pub resource_id: String,
    pub actor_id: Option<String>,
    pub correlation_id: Option<String>,
    pub severity: Severity,
    pub outcome: Outcome,
    pub details: Details,
}

impl Arbitrary for EventParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            action(),
            resource(),
            identifier(),
            proptest::option::of(identifier()),
            proptest::option::of(identifier()),
            severity(),
            outcome(),
            details(),
        )
            .prop_map(
                |(action, resource, resource_id, actor_id, correlation_id, severity, outcome, details)| {
                    EventParams {
                        action,
                        resource,
                        resource_id,
                        actor_id,
                        correlation_id,
                        severity,
                        outcome,
                        details,
                    }
                },
            )
            .boxed()
    }
}

impl EventParams {
    /// Build the event. The category always matches the action.
    pub fn to_event(&self) -> AuditEvent {
        AuditEvent {
            category: self.action.category(),
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id.clone(),
            actor_id: self.actor_id.clone(),
            correlation_id: self.correlation_id.clone(),
            severity: self.severity,
            outcome: self.outcome,
            details: self.details.clone(),
        }
    }
}
