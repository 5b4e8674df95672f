//! Entry filters for read-only queries.

use serde::{Deserialize, Serialize};

use crate::entry::AuditLogEntry;
use crate::taxonomy::{Action, Category};

/// A half-open time window `[start, end)` over entry timestamps (Unix ms).
/// Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    /// Entries at or after `start` and strictly before `end`.
    pub fn between(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Entries at or after `start`.
    pub fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Entries strictly before `end`.
    pub fn until(end: i64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Whether `timestamp` falls in the window.
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp < e)
    }
}

/// Conjunctive filter over entries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EntryFilter {
    /// A filter that matches every entry.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Whether no criterion is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether `entry` satisfies every set criterion.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(category) = self.category {
            if entry.category != category {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(range) = &self.date_range {
            if !range.contains(entry.timestamp) {
                return false;
            }
        }
        if let Some(actor) = &self.actor_id {
            if entry.actor_id.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(correlation) = &self.correlation_id {
            if entry.correlation_id.as_deref() != Some(correlation.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::entry::ChainPosition;
    use crate::event::AuditEvent;
    use crate::head::ChainHead;
    use crate::taxonomy::Resource;
    use crate::types::TenantId;

    fn entry_at(event: AuditEvent, timestamp: i64) -> AuditLogEntry {
        let tenant = TenantId::new("t").unwrap();
        let head = ChainHead::genesis(tenant.clone(), 0);
        AuditLogEntry::seal(
            &tenant,
            &canonicalize(&event).unwrap(),
            ChainPosition::after(&head, None, timestamp),
        )
    }

    #[test]
    fn test_date_range_half_open() {
        let range = DateRange::between(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert!(!range.contains(99));
        assert!(DateRange::default().contains(i64::MIN));
    }

    #[test]
    fn test_filter_conjunction() {
        let entry = entry_at(
            AuditEvent::for_action(Action::ConsentGranted, Resource::ConsentRecord, "c-1")
                .actor("u-1"),
            150,
        );

        assert!(EntryFilter::all().matches(&entry));
        assert!(EntryFilter::all()
            .category(Category::ConsentManagement)
            .actor("u-1")
            .date_range(DateRange::since(100))
            .matches(&entry));
        assert!(!EntryFilter::all()
            .category(Category::ConsentManagement)
            .actor("u-2")
            .matches(&entry));
        assert!(!EntryFilter::all().action(Action::ConsentWithdrawn).matches(&entry));
        assert!(!EntryFilter::all().correlation("x").matches(&entry));
        assert!(!EntryFilter::all().date_range(DateRange::until(150)).matches(&entry));
    }
}
