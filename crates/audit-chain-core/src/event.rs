//! Audit events: what collaborators hand to the chain.
//!
//! An [`AuditEvent`] carries the closed taxonomy fields plus a free-form
//! `details` map. The details are hashed with the rest of the event but can
//! never override a taxonomy field. [`RawAuditEvent`] is the string-typed
//! form that arrives from JSON and is checked against the vocabulary on
//! conversion.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::error::MalformedEventError;
use crate::taxonomy::{Action, Category, Outcome, Resource, Severity};
use crate::types::EntryId;

/// Free-form event details. Keys are sorted during canonicalization, so the
/// insertion order here never matters.
pub type Details = BTreeMap<String, JsonValue>;

/// A semantic audit event, before it is chained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub category: Category,
    pub action: Action,
    pub resource: Resource,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub severity: Severity,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: Details,
}

impl AuditEvent {
    /// Start an event with `info` severity and a `success` outcome.
    pub fn new(
        category: Category,
        action: Action,
        resource: Resource,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            category,
            action,
            resource,
            resource_id: resource_id.into(),
            actor_id: None,
            correlation_id: None,
            severity: Severity::Info,
            outcome: Outcome::Success,
            details: Details::new(),
        }
    }

    /// Start an event, taking the category from the action.
    pub fn for_action(action: Action, resource: Resource, resource_id: impl Into<String>) -> Self {
        Self::new(action.category(), action, resource, resource_id)
    }

    /// Set the acting user or service account.
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Link this event to related events.
    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Mark this event as a correction of an earlier entry.
    ///
    /// Entries are never edited; a correction is a new entry whose
    /// correlation id is the corrected entry's id.
    pub fn correcting(self, entry_id: &EntryId) -> Self {
        self.correlation(entry_id.to_hex())
    }

    /// Set the severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the outcome.
    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Add a detail value.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Replace all details.
    pub fn details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }
}

/// String-typed event input, as received from collaborators over JSON.
///
/// Every taxonomy field is optional here so that a missing field surfaces
/// as [`MalformedEventError::MissingField`] instead of a generic parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAuditEvent {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub details: Option<Details>,
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, MalformedEventError> {
    value.as_deref().ok_or(MalformedEventError::MissingField(field))
}

impl TryFrom<RawAuditEvent> for AuditEvent {
    type Error = MalformedEventError;

    fn try_from(raw: RawAuditEvent) -> Result<Self, Self::Error> {
        let category = Category::parse(required(&raw.category, "category")?)?;
        let action = Action::parse(required(&raw.action, "action")?)?;
        let resource = Resource::parse(required(&raw.resource, "resource")?)?;
        let resource_id = required(&raw.resource_id, "resource_id")?.to_string();
        let severity = Severity::parse(required(&raw.severity, "severity")?)?;
        let outcome = Outcome::parse(required(&raw.outcome, "outcome")?)?;

        Ok(AuditEvent {
            category,
            action,
            resource,
            resource_id,
            actor_id: raw.actor_id,
            correlation_id: raw.correlation_id,
            severity,
            outcome,
            details: raw.details.unwrap_or_default(),
        })
    }
}

impl From<&AuditEvent> for RawAuditEvent {
    fn from(event: &AuditEvent) -> Self {
        RawAuditEvent {
            category: Some(event.category.as_str().to_string()),
            action: Some(event.action.as_str().to_string()),
            resource: Some(event.resource.as_str().to_string()),
            resource_id: Some(event.resource_id.clone()),
            actor_id: event.actor_id.clone(),
            correlation_id: event.correlation_id.clone(),
            severity: Some(event.severity.as_str().to_string()),
            outcome: Some(event.outcome.as_str().to_string()),
            details: (!event.details.is_empty()).then(|| event.details.clone()),
        }
    }
}
