//! End-to-end behavior of appending and verifying chains.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;

use audit_chain::core::{
    canonicalize, BreakKind, ChainHash, ChainPosition, MalformedEventError,
};
use audit_chain::store::{CommitOutcome, MemoryStore, Store, StoreError};
use audit_chain::{
    Action, AuditError, AuditEvent, AuditLog, AuditLogConfig, AuditLogEntry, Category, ChainHead,
    EntryFilter, EntryId, Outcome, RawAuditEvent, Resource, RetryPolicy, Severity, TenantId,
    VerificationMetadata, VerificationStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn tenant(name: &str) -> TenantId {
    TenantId::new(name).unwrap()
}

fn contended_config() -> AuditLogConfig {
    AuditLogConfig {
        retry: RetryPolicy {
            max_attempts: 500,
            base_delay_ms: 1,
            max_delay_ms: 4,
        },
        verify_page_size: 16,
        query_page_size: 16,
    }
}

fn memory_log() -> (Arc<MemoryStore>, AuditLog<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let log = AuditLog::from_shared(Arc::clone(&store), contended_config());
    (store, log)
}

fn data_event(n: usize) -> AuditEvent {
    AuditEvent::for_action(Action::DataUpdated, Resource::User, format!("user-{}", n))
}

async fn append_n(log: &AuditLog<MemoryStore>, tenant: &TenantId, n: usize) -> Vec<AuditLogEntry> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(log.append(tenant, data_event(i)).await.unwrap());
    }
    out
}

/// A consent change, the processing it allowed, and the breach that
/// followed.
async fn three_categories(log: &AuditLog<MemoryStore>, tenant: &TenantId) -> Vec<AuditLogEntry> {
    let events = [
        AuditEvent::for_action(Action::ConsentGranted, Resource::ConsentRecord, "consent-9")
            .actor("alice")
            .detail("purpose", "newsletter"),
        AuditEvent::for_action(Action::DataExported, Resource::DataSubject, "subject-3")
            .actor("bob")
            .detail("rows", 120),
        AuditEvent::for_action(Action::BreachDetected, Resource::BreachIncident, "inc-7")
            .severity(Severity::Critical)
            .outcome(Outcome::Pending),
    ];
    let mut entries = Vec::new();
    for event in events {
        entries.push(log.append(tenant, event).await.unwrap());
    }
    entries
}

// ─────────────────────────────────────────────────────────────────────────────
// Appending
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_append_links_to_genesis() {
    let (_, log) = memory_log();
    let t = tenant("t1");

    let entry = log.append(&t, data_event(0)).await.unwrap();

    assert_eq!(entry.sequence, 0);
    assert!(entry.is_genesis());
    assert_eq!(entry.previous_entry_hash, ChainHash::GENESIS);
    assert!(entry.verify_hash());

    let head = log.head(&t).await.unwrap().unwrap();
    assert_eq!(head.chain_length, 1);
    assert_eq!(head.last_entry_id, Some(entry.id));
    assert_eq!(head.last_entry_hash, entry.entry_hash);
}

#[tokio::test]
async fn test_entries_link_and_timestamps_never_decrease() {
    let (_, log) = memory_log();
    let t = tenant("t1");

    let entries = three_categories(&log, &t).await;

    let categories: Vec<_> = entries.iter().map(|e| e.category).collect();
    assert_eq!(
        categories,
        vec![
            Category::ConsentManagement,
            Category::DataProcessing,
            Category::BreachResponse
        ]
    );
    for pair in entries.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert_eq!(pair[1].previous_entry_hash, pair[0].entry_hash);
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }

    let stored = log.entry(&t, &entries[0].id).await.unwrap().unwrap();
    assert_eq!(stored, entries[0]);
    let event = stored.event().unwrap();
    assert_eq!(event.details["purpose"], "newsletter");
}

#[tokio::test]
async fn test_malformed_event_never_touches_the_chain() {
    let (store, log) = memory_log();
    let t = tenant("t1");

    let mismatched = AuditEvent::new(
        Category::SystemAccess,
        Action::DataCreated,
        Resource::User,
        "u-1",
    );
    let err = log.append(&t, mismatched).await.unwrap_err();
    assert!(matches!(
        err,
        AuditError::Malformed(MalformedEventError::ActionNotInCategory { .. })
    ));
    assert!(!err.is_transient());

    let raw = RawAuditEvent {
        category: Some("data_processing".into()),
        action: Some("data_shredded".into()),
        resource: Some("user".into()),
        resource_id: Some("u-1".into()),
        severity: Some("info".into()),
        outcome: Some("success".into()),
        ..RawAuditEvent::default()
    };
    let err = log.append_raw(&t, raw).await.unwrap_err();
    assert!(matches!(
        err,
        AuditError::Malformed(MalformedEventError::UnknownValue { field: "action", .. })
    ));

    let missing = RawAuditEvent {
        action: Some("data_created".into()),
        ..RawAuditEvent::default()
    };
    assert!(matches!(
        log.append_raw(&t, missing).await,
        Err(AuditError::Malformed(MalformedEventError::MissingField("category")))
    ));

    assert!(log.head(&t).await.unwrap().is_none());
    assert_eq!(store.entry_count(&t), 0);
}

#[tokio::test]
async fn test_append_raw_accepts_valid_input() {
    let (_, log) = memory_log();
    let t = tenant("t1");

    let raw: RawAuditEvent = serde_json::from_str(
        r#"{
            "category": "breach_response",
            "action": "breach_detected",
            "resource": "breach_incident",
            "resource_id": "inc-42",
            "severity": "critical",
            "outcome": "pending",
            "details": { "systems": ["crm", "billing"], "score": 9.5 }
        }"#,
    )
    .unwrap();

    let entry = log.append_raw(&t, raw).await.unwrap();
    assert_eq!(entry.action, Action::BreachDetected);
    assert!(entry.severity.is_alerting());
    assert_eq!(entry.event().unwrap().details["score"], "9.500000");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_form_one_chain() {
    init_tracing();
    let (_, log) = memory_log();
    let t = tenant("busy");

    let mut tasks = Vec::new();
    for writer in 0..4 {
        let log = log.clone();
        let t = t.clone();
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..25 {
                let event = data_event(writer * 100 + i).correlation(format!("writer-{}", writer));
                ids.push(log.append(&t, event).await.unwrap().sequence);
            }
            ids
        }));
    }

    let mut sequences = Vec::new();
    for task in tasks {
        sequences.extend(task.await.unwrap());
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (0..100).collect::<Vec<u64>>());

    let report = log.verify(&t, 0).await.unwrap();
    assert!(report.is_valid(), "{:?}", report.failure);
    assert_eq!(report.entries_verified, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tenants_do_not_contend() {
    let store = Arc::new(MemoryStore::new());
    let busy = AuditLog::from_shared(Arc::clone(&store), contended_config());
    // A single attempt is enough when nobody else writes this tenant.
    let quiet = AuditLog::from_shared(
        Arc::clone(&store),
        AuditLogConfig {
            retry: RetryPolicy::no_retry(),
            ..AuditLogConfig::default()
        },
    );
    let a = tenant("tenant-a");
    let b = tenant("tenant-b");

    let mut hammer = Vec::new();
    for w in 0..4 {
        let busy = busy.clone();
        let a = a.clone();
        hammer.push(tokio::spawn(async move {
            for i in 0..20 {
                busy.append(&a, data_event(w * 100 + i)).await.unwrap();
            }
        }));
    }

    for i in 0..20 {
        let entry = quiet.append(&b, data_event(i)).await.unwrap();
        assert_eq!(entry.sequence, i as u64);
    }
    for task in hammer {
        task.await.unwrap();
    }

    assert_eq!(busy.head(&a).await.unwrap().unwrap().chain_length, 80);
    assert_eq!(quiet.head(&b).await.unwrap().unwrap().chain_length, 20);
    assert!(busy.verify(&a, 0).await.unwrap().is_valid());
    assert!(quiet.verify(&b, 0).await.unwrap().is_valid());

    let tenants = busy.tenants().await.unwrap();
    assert_eq!(tenants, vec![a, b]);
}

/// Memory store whose next `gated` commits wait for each other, so that
/// two appends are guaranteed to race on the same head.
struct RacingStore {
    inner: MemoryStore,
    gate: Barrier,
    gated: AtomicUsize,
    conflicts: AtomicUsize,
}

impl RacingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gate: Barrier::new(2),
            gated: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for RacingStore {
    async fn get_entry(
        &self,
        tenant_id: &TenantId,
        id: &EntryId,
    ) -> Result<Option<AuditLogEntry>, StoreError> {
        self.inner.get_entry(tenant_id, id).await
    }

    async fn get_entry_by_sequence(
        &self,
        tenant_id: &TenantId,
        sequence: u64,
    ) -> Result<Option<AuditLogEntry>, StoreError> {
        self.inner.get_entry_by_sequence(tenant_id, sequence).await
    }

    async fn latest_entry(&self, tenant_id: &TenantId) -> Result<Option<AuditLogEntry>, StoreError> {
        self.inner.latest_entry(tenant_id).await
    }

    async fn get_entries_range(
        &self,
        tenant_id: &TenantId,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.inner.get_entries_range(tenant_id, start, end, limit).await
    }

    async fn query_entries(
        &self,
        tenant_id: &TenantId,
        filter: &EntryFilter,
        start: u64,
        end: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.inner.query_entries(tenant_id, filter, start, end, limit).await
    }

    async fn get_head(&self, tenant_id: &TenantId) -> Result<Option<ChainHead>, StoreError> {
        self.inner.get_head(tenant_id).await
    }

    async fn init_head(&self, tenant_id: &TenantId, now: i64) -> Result<ChainHead, StoreError> {
        self.inner.init_head(tenant_id, now).await
    }

    async fn commit_entry(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
    ) -> Result<CommitOutcome, StoreError> {
        let take_gate = self
            .gated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if take_gate {
            self.gate.wait().await;
        }
        let outcome = self.inner.commit_entry(entry, expected_version).await?;
        if !outcome.is_committed() {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    async fn advance_head(
        &self,
        entry: &AuditLogEntry,
        expected_version: u64,
        now: i64,
    ) -> Result<CommitOutcome, StoreError> {
        self.inner.advance_head(entry, expected_version, now).await
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        self.inner.list_tenants().await
    }

    async fn get_verification(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<VerificationMetadata>, StoreError> {
        self.inner.get_verification(tenant_id).await
    }

    async fn put_verification(&self, metadata: &VerificationMetadata) -> Result<(), StoreError> {
        self.inner.put_verification(metadata).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_appends_one_wins_one_retries() {
    init_tracing();
    let log = AuditLog::new(RacingStore::new(), contended_config());
    let t = tenant("t2");

    for i in 0..5 {
        log.append(&t, data_event(i)).await.unwrap();
    }
    assert_eq!(log.store().conflicts.load(Ordering::SeqCst), 0);

    log.store().gated.store(2, Ordering::SeqCst);
    let racers: Vec<_> = (0..2)
        .map(|i| {
            let log = log.clone();
            let t = t.clone();
            tokio::spawn(async move { log.append(&t, data_event(100 + i)).await })
        })
        .collect();

    let mut sequences = Vec::new();
    for racer in racers {
        sequences.push(racer.await.unwrap().unwrap().sequence);
    }
    sequences.sort_unstable();

    assert_eq!(sequences, vec![5, 6]);
    assert_eq!(log.store().conflicts.load(Ordering::SeqCst), 1);

    let head = log.head(&t).await.unwrap().unwrap();
    assert_eq!(head.chain_length, 7);
    assert!(log.verify(&t, 0).await.unwrap().is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_contention_without_retry_is_reported() {
    let log = AuditLog::new(
        RacingStore::new(),
        AuditLogConfig {
            retry: RetryPolicy::no_retry(),
            ..AuditLogConfig::default()
        },
    );
    let t = tenant("t3");
    log.append(&t, data_event(0)).await.unwrap();

    log.store().gated.store(2, Ordering::SeqCst);
    let racers: Vec<_> = (0..2)
        .map(|i| {
            let log = log.clone();
            let t = t.clone();
            tokio::spawn(async move { log.append(&t, data_event(i)).await })
        })
        .collect();

    let mut results = Vec::new();
    for racer in racers {
        results.push(racer.await.unwrap());
    }

    let (won, lost): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
    assert_eq!(won.len(), 1);
    match &lost[..] {
        [Err(err @ AuditError::ChainContention { attempts: 1, .. })] => {
            assert!(err.is_transient());
        }
        other => panic!("expected one contention error, got {:?}", other),
    }
    assert_eq!(log.head(&t).await.unwrap().unwrap().chain_length, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_verify_intact_chain_is_idempotent() {
    let (_, log) = memory_log();
    let t = tenant("t1");
    three_categories(&log, &t).await;
    let head_before = log.head(&t).await.unwrap().unwrap();

    let first = log.verify(&t, 0).await.unwrap();
    let second = log.verify(&t, 0).await.unwrap();

    assert!(first.is_valid());
    assert_eq!(first.entries_verified, 3);
    assert_eq!(first.chain_length, 3);
    assert_eq!(first.head_hash, head_before.last_entry_hash);
    assert_eq!(
        (first.status, first.entries_verified, first.head_hash),
        (second.status, second.entries_verified, second.head_hash)
    );

    // Verification never moves the head.
    assert_eq!(log.head(&t).await.unwrap().unwrap(), head_before);

    let status = log.verification_status(&t).await.unwrap();
    assert_eq!(status.status, VerificationStatus::Valid);
    assert_eq!(status.entries_verified, 3);
    assert!(status.broken_at_entry_id.is_none());
}

#[tokio::test]
async fn test_payload_tamper_is_located() {
    init_tracing();
    let (store, log) = memory_log();
    let t = tenant("t1");
    let entries = three_categories(&log, &t).await;

    assert_eq!(log.head(&t).await.unwrap().unwrap().chain_length, 3);
    assert_eq!(entries.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(log.verify(&t, 0).await.unwrap().is_valid());

    assert!(store.tamper_entry(&t, 1, |entry| {
        let mut payload = entry.canonical_payload.to_vec();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        entry.canonical_payload = payload.into();
    }));

    let report = log.verify(&t, 0).await.unwrap();
    assert_eq!(report.status, VerificationStatus::Broken);
    assert_eq!(report.broken_at_entry_id(), Some(entries[1].id));
    assert_eq!(report.broken_at_sequence(), Some(1));
    assert_eq!(report.entries_verified, 1);
    assert_eq!(report.actual_hash(), Some(entries[1].entry_hash));
    assert_ne!(report.expected_hash(), Some(entries[1].entry_hash));
    assert_eq!(report.failure.as_ref().unwrap().kind, BreakKind::HashMismatch);

    let status = log.verification_status(&t).await.unwrap();
    assert_eq!(status.status, VerificationStatus::Broken);
    assert_eq!(status.broken_at_entry_id, Some(entries[1].id));

    assert!(matches!(report.ensure_valid(), Err(AuditError::ChainIntegrity(_))));
}

#[tokio::test]
async fn test_stored_hash_tamper_is_detected() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    let entries = append_n(&log, &t, 4).await;

    store.tamper_entry(&t, 2, |entry| {
        entry.entry_hash = ChainHash::from_bytes([0xab; 32]);
    });

    let report = log.verify(&t, 0).await.unwrap();
    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, BreakKind::HashMismatch);
    assert_eq!(failure.entry_id, Some(entries[2].id));
    assert_eq!(failure.expected_hash, entries[2].entry_hash);
}

#[tokio::test]
async fn test_relinked_entry_is_detected() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    let entries = append_n(&log, &t, 4).await;

    store.tamper_entry(&t, 3, |entry| {
        entry.previous_entry_hash = entries[1].entry_hash;
    });

    let failure = log.verify(&t, 0).await.unwrap().failure.unwrap();
    assert_eq!(failure.kind, BreakKind::BrokenLink);
    assert_eq!(failure.sequence, 3);
    assert_eq!(failure.expected_hash, entries[2].entry_hash);
    assert_eq!(failure.actual_hash, entries[1].entry_hash);
}

#[tokio::test]
async fn test_rewritten_row_column_is_detected() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    append_n(&log, &t, 3).await;

    // The payload and hash still agree; only the indexed column lies.
    store.tamper_entry(&t, 1, |entry| {
        entry.resource_id = "someone-else".into();
    });

    let failure = log.verify(&t, 0).await.unwrap().failure.unwrap();
    assert_eq!(failure.kind, BreakKind::EnvelopeMismatch);
    assert_eq!(failure.sequence, 1);
}

#[tokio::test]
async fn test_deleted_middle_entry_is_a_gap() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    append_n(&log, &t, 5).await;

    assert!(store.delete_entry(&t, 2));

    let failure = log.verify(&t, 0).await.unwrap().failure.unwrap();
    assert_eq!(failure.kind, BreakKind::SequenceGap);
    assert_eq!(failure.sequence, 2);
}

#[tokio::test]
async fn test_truncated_tail_is_detected_and_blocks_appends() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    let entries = append_n(&log, &t, 3).await;

    assert!(store.delete_entry(&t, 2));

    let failure = log.verify(&t, 0).await.unwrap().failure.unwrap();
    assert_eq!(failure.kind, BreakKind::Truncated);
    assert_eq!(failure.sequence, 2);
    assert_eq!(failure.entry_id, Some(entries[2].id));

    let err = log.append(&t, data_event(9)).await.unwrap_err();
    assert!(matches!(err, AuditError::InconsistentHead { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_forged_head_is_detected() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    append_n(&log, &t, 3).await;

    let mut head = log.head(&t).await.unwrap().unwrap();
    head.last_entry_hash = ChainHash::from_bytes([0x11; 32]);
    store.overwrite_head(head);

    let failure = log.verify(&t, 0).await.unwrap().failure.unwrap();
    assert_eq!(failure.kind, BreakKind::HeadMismatch);
    assert_eq!(failure.sequence, 2);
}

#[tokio::test]
async fn test_verify_from_checkpoint() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    append_n(&log, &t, 10).await;

    let report = log.verify(&t, 4).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.from_sequence, 4);
    assert_eq!(report.entries_verified, 6);

    let at_head = log.verify(&t, 10).await.unwrap();
    assert!(at_head.is_valid());
    assert_eq!(at_head.entries_verified, 0);

    assert!(matches!(
        log.verify(&t, 11).await,
        Err(AuditError::InvalidRange(_))
    ));

    // Damage before the checkpoint is out of scope for the partial walk.
    store.tamper_entry(&t, 1, |entry| {
        entry.entry_hash = ChainHash::from_bytes([0x22; 32]);
    });
    let partial = log.verify(&t, 5).await.unwrap();
    assert!(partial.is_valid());
    assert!(!log.verify(&t, 0).await.unwrap().is_valid());
}

#[tokio::test]
async fn test_verify_unknown_tenant_is_an_empty_valid_chain() {
    let (_, log) = memory_log();
    let t = tenant("nobody");

    assert_eq!(
        log.verification_status(&t).await.unwrap().status,
        VerificationStatus::Unverified
    );

    let report = log.verify(&t, 0).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.chain_length, 0);
    assert_eq!(report.head_hash, ChainHash::GENESIS);
    assert!(log.head(&t).await.unwrap().is_none());
}

#[tokio::test]
async fn test_verify_all_reports_each_tenant() {
    let (store, log) = memory_log();
    let good = tenant("good");
    let bad = tenant("bad");
    append_n(&log, &good, 3).await;
    append_n(&log, &bad, 3).await;
    store.delete_entry(&bad, 0);

    let reports = log.verify_all().await.unwrap();
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report.is_valid(), report.tenant_id == good);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recovery
// ─────────────────────────────────────────────────────────────────────────────

/// Seal the entry that would come next, as a crashed commit would have left it.
async fn orphan_after(log: &AuditLog<MemoryStore>, t: &TenantId, n: usize) -> AuditLogEntry {
    let head = log.head(t).await.unwrap().unwrap();
    let canonical = canonicalize(&data_event(n)).unwrap();
    AuditLogEntry::seal(t, &canonical, ChainPosition::after(&head, None, 5_000_000_000_000))
}

#[tokio::test]
async fn test_orphaned_entry_is_adopted() {
    init_tracing();
    let (store, log) = memory_log();
    let t = tenant("t1");
    append_n(&log, &t, 2).await;

    let orphan = orphan_after(&log, &t, 2).await;
    store.insert_orphan(orphan.clone());
    assert_eq!(log.head(&t).await.unwrap().unwrap().chain_length, 2);

    let next = log.append(&t, data_event(3)).await.unwrap();
    assert_eq!(next.sequence, 3);
    assert_eq!(next.previous_entry_hash, orphan.entry_hash);
    assert!(next.timestamp >= orphan.timestamp);

    let head = log.head(&t).await.unwrap().unwrap();
    assert_eq!(head.chain_length, 4);
    assert!(log.verify(&t, 0).await.unwrap().is_valid());
}

#[tokio::test]
async fn test_unprovable_orphan_is_refused() {
    let (store, log) = memory_log();
    let t = tenant("t1");
    append_n(&log, &t, 2).await;

    let mut orphan = orphan_after(&log, &t, 2).await;
    orphan.previous_entry_hash = ChainHash::from_bytes([0x33; 32]);
    store.insert_orphan(orphan);

    let err = log.append(&t, data_event(3)).await.unwrap_err();
    assert!(matches!(err, AuditError::InconsistentHead { .. }));
    assert_eq!(log.head(&t).await.unwrap().unwrap().chain_length, 2);
}
