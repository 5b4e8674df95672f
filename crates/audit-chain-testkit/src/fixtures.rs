//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use audit_chain::{AuditLog, AuditLogConfig, RetryPolicy};
use audit_chain_core::{Action, AuditEvent, AuditLogEntry, Category, Resource, TenantId};
use audit_chain_store::MemoryStore;

/// An audit log over a memory store, with the store kept at hand for
/// tampering.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub log: AuditLog<MemoryStore>,
}

impl TestFixture {
    /// Create a fixture with [`fast_config`].
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: AuditLogConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            log: AuditLog::from_shared(Arc::clone(&store), config),
            store,
        }
    }

    /// Build a tenant id. Panics on invalid names.
    pub fn tenant(&self, name: &str) -> TenantId {
        TenantId::new(name).expect("valid tenant id")
    }

    /// Append `count` events, cycling through every category.
    pub async fn append_mixed(&self, tenant: &TenantId, count: usize) -> Vec<AuditLogEntry> {
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let category = Category::ALL[i % Category::ALL.len()];
            let entry = self
                .log
                .append(tenant, event_in(category, i))
                .await
                .expect("append");
            entries.push(entry);
        }
        entries
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Config with a short backoff and generous retries, for contention tests.
pub fn fast_config() -> AuditLogConfig {
    AuditLogConfig {
        retry: RetryPolicy {
            max_attempts: 200,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        verify_page_size: 7,
        query_page_size: 5,
    }
}

/// A valid event in `category`, numbered `n`.
pub fn event_in(category: Category, n: usize) -> AuditEvent {
    let actions: Vec<Action> = category.actions().collect();
    let action = actions[n % actions.len()];
    let resource = match category {
        Category::DataProcessing => Resource::DataSubject,
        Category::ConsentManagement => Resource::ConsentRecord,
        Category::BreachResponse => Resource::BreachIncident,
        Category::SystemAccess => Resource::Session,
        Category::ComplianceMonitoring => Resource::RightsRequest,
        Category::AdministrativeAction => Resource::User,
        Category::AutomatedProcess => Resource::Report,
    };
    AuditEvent::for_action(action, resource, format!("{}-{}", resource, n))
        .actor(format!("actor-{}", n % 3))
        .detail("n", n as u64)
}

/// A plain data event, for tests that only care about the chain.
pub fn data_event(n: usize) -> AuditEvent {
    AuditEvent::for_action(Action::DataUpdated, Resource::User, format!("user-{}", n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_chain_core::canonicalize;

    #[test]
    fn test_event_in_every_category_is_valid() {
        for category in Category::ALL {
            for n in 0..category.actions().count() {
                let event = event_in(*category, n);
                assert_eq!(event.category, *category);
                canonicalize(&event).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_fixture_chain() {
        let fixture = TestFixture::new();
        let tenant = fixture.tenant("fixture");

        let entries = fixture.append_mixed(&tenant, 9).await;

        assert_eq!(entries[0].sequence, 0);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_entry_hash, pair[0].entry_hash);
        }
        assert_eq!(fixture.store.entry_count(&tenant), 9);
        assert!(fixture.log.verify(&tenant, 0).await.unwrap().is_valid());
    }
}
