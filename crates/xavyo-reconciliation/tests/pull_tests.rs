//! Pull Orchestrator Tests
//!
//! End-to-end pulls against the in-memory connector and identity store:
//! - creation, idempotent re-runs and change detection
//! - correlation outcomes (ambiguous, first match, strict add, missing values)
//! - every policy outcome against the store, live and in dry run
//! - deletion notices from the change log
//! - sync token handling across failures
//! - task flags, hooks, cancellation and exclusive execution

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use xavyo_connector::object::ConnObject;
use xavyo_connector::operation::SyncToken;
use xavyo_reconciliation::prelude::*;

use common::*;

fn email_rule() -> CorrelationRule {
    CorrelationRule::new(vec![CorrelationItem::equals_ignore_case("email")])
}

fn pull_task(action: ConflictAction) -> PullTask {
    PullTask::new(
        "ldap-users",
        "ldap",
        AnyType::User,
        email_rule(),
        ConflictPolicy::new(action),
    )
}

fn setup() -> (Harness, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new("ldap"));
    let harness = harness(vec![("ldap", connector.clone())]);
    (harness, connector)
}

fn dry_run(task: PullTask) -> PullTask {
    task.with_flags(TaskFlags {
        dry_run: true,
        ..TaskFlags::default()
    })
}

/// A dry run leaves the store and the stored token exactly as they were.
fn assert_dry_run_untouched(h: &Harness, report: &ExecutionReport, mutations: usize) {
    assert!(report.dry_run);
    assert!(report
        .items
        .iter()
        .filter(|i| i.outcome != ItemOutcome::Ignored)
        .all(|i| i.message.as_deref() == Some("dry run")));
    assert_eq!(h.store.mutation_count(), mutations);
    assert!(h.tokens.current(h.tenant, "ldap", &AnyType::User).is_none());
}

fn fullname(h: &Harness, name: &str) -> Option<String> {
    h.store
        .by_name(h.tenant, name)
        .and_then(|any| any.plain.get("fullname").and_then(|v| v.first().cloned()))
}

// =============================================================================
// Creation and Idempotence
// =============================================================================

#[tokio::test]
async fn test_pull_creates_missing_identities() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.change(remote_user("bob", "bob@example.com"));
    ldap.change(remote_user("carol", "carol@example.com"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::AddOrUpdate), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.created, 3);
    assert_eq!(report.propagation.success, 3);
    assert_eq!(h.store.all(h.tenant).len(), 3);

    let alice = h.store.by_name(h.tenant, "alice").unwrap();
    assert_eq!(alice.plain.get("email"), Some(&["alice@example.com".to_string()][..]));
    assert_eq!(alice.plain.get("fullname"), Some(&["ALICE".to_string()][..]));

    // Three objects over pages of two: the token lands on the last page.
    assert_eq!(
        h.tokens.current(h.tenant, "ldap", &AnyType::User),
        Some(SyncToken::new("3"))
    );
}

#[tokio::test]
async fn test_lowercase_mapping_correlates_and_creates() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "Alice@Example.com"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::AddOrUpdate), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.counts.created, 1);
    assert_eq!(report.items[0].operation, Some(DecisionKind::Create));
    let alice = h.store.by_name(h.tenant, "alice").unwrap();
    assert_eq!(alice.plain.get("email"), Some(&["alice@example.com".to_string()][..]));
}

#[tokio::test]
async fn test_full_reconciliation_rerun_is_idempotent() {
    let (h, ldap) = setup();
    for uid in ["alice", "bob", "carol", "dave"] {
        ldap.change(remote_user(uid, &format!("{uid}@example.com")));
    }
    let task = pull_task(ConflictAction::AddOrUpdate).with_mode(PullMode::FullReconciliation);

    let first = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();
    assert_eq!(first.counts.created, 4);
    let mutations = h.store.mutation_count();

    let second = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Success);
    assert_eq!(second.counts.mutations(), 0);
    assert_eq!(second.counts.ignored, 4);
    assert!(second
        .items
        .iter()
        .all(|i| i.message.as_deref() == Some("unchanged")));
    assert_eq!(h.store.mutation_count(), mutations);
}

#[tokio::test]
async fn test_incremental_rerun_only_sees_new_changes() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    let task = pull_task(ConflictAction::AddOrUpdate);

    h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    ldap.change(remote_user("alice", "alice@example.com").with("cn", "Alice Liddell"));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.total(), 1);
    assert_eq!(ldap.since_tokens().last().cloned().flatten(), Some("1".to_string()));
    let alice = h.store.by_name(h.tenant, "alice").unwrap();
    assert_eq!(alice.plain.get("fullname"), Some(&["Alice Liddell".to_string()][..]));
}

#[tokio::test]
async fn test_repeated_key_is_tracked_once_per_occurrence() {
    let (h, ldap) = setup();
    let mut task = pull_task(ConflictAction::AddOrUpdate);
    task.sync_token = Some(SyncToken::new("0"));

    // Same page twice: only the last occurrence is processed.
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.change(remote_user("alice", "alice@example.com").with("cn", "Alice"));
    // Next page repeats the key with another change.
    ldap.change(remote_user("alice", "alice@example.com").with("cn", "Alice L."));

    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.updated, 1);
    let items: Vec<&str> = report
        .propagation_entries
        .iter()
        .map(|e| e.item.as_str())
        .collect();
    assert_eq!(items, vec!["alice", "alice#1"]);
}

// =============================================================================
// Correlation Outcomes
// =============================================================================

#[tokio::test]
async fn test_ambiguous_match_goes_to_remediation() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("shared1", "shared@example.com"));
    h.store.insert(h.tenant, local_user("shared2", "shared@example.com"));
    ldap.change(remote_user("carol", "SHARED@example.com"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::Update), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::SuccessWithErrors);
    assert_eq!(report.counts.remediated, 1);
    assert_eq!(report.counts.mutations(), 0);
    assert_eq!(h.store.mutation_count(), 0);

    let records = h.remediation.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(report.remediation_refs, vec![records[0].id]);
    assert_eq!(records[0].key, "carol");
    match &records[0].reason {
        RemediationReason::Ambiguous { candidates } => {
            assert_eq!(candidates.len(), 2);
            let mut sorted = candidates.clone();
            sorted.sort();
            assert_eq!(*candidates, sorted);
        }
        other => panic!("unexpected reason: {other:?}"),
    }
}

#[tokio::test]
async fn test_first_match_updates_lowest_key() {
    let (h, ldap) = setup();
    let a = h.store.insert(h.tenant, local_user("shared1", "shared@example.com"));
    let b = h.store.insert(h.tenant, local_user("shared2", "shared@example.com"));
    ldap.change(remote_user("shared", "shared@example.com").with("cn", "Updated"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::FirstMatch), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.counts.updated, 1);
    let first = a.min(b);
    let updated: Vec<Any> = h
        .store
        .all(h.tenant)
        .into_iter()
        .filter(|any| any.plain.get("fullname") == Some(&["Updated".to_string()][..]))
        .collect();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].key, first);
}

#[tokio::test]
async fn test_strict_add_on_existing_match_fails_item() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.change(remote_user("alice", "alice@example.com"));

    let mut task = pull_task(ConflictAction::Add);
    task.policy = ConflictPolicy::new(ConflictAction::Add).strict();
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::SuccessWithErrors);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.items[0].operation, Some(DecisionKind::Conflict));
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_ignore_policy_never_mutates() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::Ignore), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.ignored, 1);
    assert!(h.store.all(h.tenant).is_empty());
}

#[tokio::test]
async fn test_missing_correlation_value_never_duplicates() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.change(ConnObject::new("alice").with("uid", "alice").with("cn", "ALICE"));
    let task = pull_task(ConflictAction::AddOrUpdate).with_mode(PullMode::FullReconciliation);

    for _ in 0..2 {
        let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::SuccessWithErrors);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.created, 0);
        let message = report.items[0].message.as_deref().unwrap();
        assert!(message.contains("correlation attribute 'email'"), "{message}");
    }

    assert_eq!(h.store.all(h.tenant).len(), 1);
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_rule_on_attribute_not_mapped_inbound_is_invalid_task() {
    let connector = Arc::new(MockConnector::new("ldap"));
    let store = Arc::new(MemoryStore::new());
    let provision = Provision::new(AnyType::User, OBJECT_CLASS)
        .with_item(Item::key("username", "uid"))
        .with_item(Item::new("email", "mail").with_purpose(ItemPurpose::Propagation));
    let engine = ReconciliationEngine::builder(store)
        .with_config(test_config())
        .with_schemas(schemas())
        .with_resource(ExternalResource::new("ldap").with_provision(provision), connector.clone())
        .build()
        .unwrap();

    let err = engine
        .pull(TenantId::new(), &pull_task(ConflictAction::AddOrUpdate), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconciliationError::InvalidTask { .. }));
    assert!(err.to_string().contains("not mapped inbound"));
    assert_eq!(connector.search_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Policy Outcomes
// =============================================================================

#[tokio::test]
async fn test_matched_under_delete_policy_deletes_identity() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    h.store.insert(h.tenant, local_user("bob", "bob@example.com"));
    ldap.change(remote_user("alice", "alice@example.com"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::Delete), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.deleted, 1);
    assert_eq!(report.items[0].operation, Some(DecisionKind::Delete));
    assert!(h.store.by_name(h.tenant, "alice").is_none());
    assert!(h.store.by_name(h.tenant, "bob").is_some());
}

#[tokio::test]
async fn test_matched_under_delete_policy_dry_run() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.change(remote_user("alice", "alice@example.com"));

    let task = dry_run(pull_task(ConflictAction::Delete));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.deleted, 1);
    assert_dry_run_untouched(&h, &report, 0);
    assert!(h.store.by_name(h.tenant, "alice").is_some());
}

#[tokio::test]
async fn test_matched_under_update_policy_updates_identity() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.change(remote_user("alice", "alice@example.com").with("cn", "Alice Liddell"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::Update), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.updated, 1);
    assert_eq!(h.store.mutation_count(), 1);
    assert_eq!(h.store.all(h.tenant).len(), 1);
    assert_eq!(fullname(&h, "alice").as_deref(), Some("Alice Liddell"));
}

#[tokio::test]
async fn test_matched_under_update_policy_dry_run() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.change(remote_user("alice", "alice@example.com").with("cn", "Alice Liddell"));

    let task = dry_run(pull_task(ConflictAction::Update));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.updated, 1);
    assert_dry_run_untouched(&h, &report, 0);
    assert_eq!(fullname(&h, "alice").as_deref(), Some("ALICE"));
}

#[tokio::test]
async fn test_unmatched_under_update_policy_is_ignored() {
    let (h, ldap) = setup();
    ldap.change(remote_user("bob", "bob@example.com"));

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::Update), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.ignored, 1);
    assert_eq!(report.counts.mutations(), 0);
    assert_eq!(report.items[0].operation, Some(DecisionKind::NoOp));
    assert!(h.store.all(h.tenant).is_empty());
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_unmatched_under_update_policy_dry_run() {
    let (h, ldap) = setup();
    ldap.change(remote_user("bob", "bob@example.com"));

    let task = dry_run(pull_task(ConflictAction::Update));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.ignored, 1);
    assert_eq!(report.counts.mutations(), 0);
    assert_dry_run_untouched(&h, &report, 0);
    assert!(h.store.all(h.tenant).is_empty());
}

#[tokio::test]
async fn test_first_match_dry_run_touches_nothing() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("shared1", "shared@example.com"));
    h.store.insert(h.tenant, local_user("shared2", "shared@example.com"));
    ldap.change(remote_user("shared", "shared@example.com").with("cn", "Updated"));

    let task = dry_run(pull_task(ConflictAction::FirstMatch));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.remediated, 0);
    assert_dry_run_untouched(&h, &report, 0);
    assert!(h
        .store
        .all(h.tenant)
        .iter()
        .all(|any| any.plain.get("fullname") != Some(&["Updated".to_string()][..])));
}

// =============================================================================
// Deletion Notices
// =============================================================================

#[tokio::test]
async fn test_deletion_notice_deletes_matched_identity() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.change(remote_user("bob", "bob@example.com"));
    let task = pull_task(ConflictAction::AddOrUpdate);

    let first = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();
    assert_eq!(first.counts.created, 2);

    ldap.remove("alice");
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.deleted, 1);
    assert_eq!(report.counts.total(), 1);
    assert_eq!(report.items[0].key, "alice");
    assert_eq!(report.items[0].operation, Some(DecisionKind::Delete));
    assert!(h.store.by_name(h.tenant, "alice").is_none());
    assert!(h.store.by_name(h.tenant, "bob").is_some());
    assert_eq!(
        h.tokens.current(h.tenant, "ldap", &AnyType::User),
        Some(SyncToken::new("3"))
    );
}

#[tokio::test]
async fn test_deletion_notice_without_match_is_ignored() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.remove("ghost");
    let mut task = pull_task(ConflictAction::AddOrUpdate);
    task.sync_token = Some(SyncToken::new("0"));

    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.ignored, 1);
    assert_eq!(report.items[0].message.as_deref(), Some("no identity to delete"));
    assert_eq!(h.store.mutation_count(), 0);
    assert_eq!(h.store.all(h.tenant).len(), 1);
}

#[tokio::test]
async fn test_deletion_notice_respects_perform_delete() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.remove("alice");
    let mut task = pull_task(ConflictAction::AddOrUpdate).with_flags(TaskFlags {
        perform_delete: false,
        ..TaskFlags::default()
    });
    task.sync_token = Some(SyncToken::new("0"));

    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.ignored, 1);
    assert_eq!(report.items[0].operation, Some(DecisionKind::Delete));
    assert!(h.store.by_name(h.tenant, "alice").is_some());
}

#[tokio::test]
async fn test_deletion_notice_dry_run() {
    let (h, ldap) = setup();
    h.store.insert(h.tenant, local_user("alice", "alice@example.com"));
    ldap.remove("alice");
    let mut task = dry_run(pull_task(ConflictAction::AddOrUpdate));
    task.sync_token = Some(SyncToken::new("0"));

    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.counts.deleted, 1);
    assert_dry_run_untouched(&h, &report, 0);
    assert!(h.store.by_name(h.tenant, "alice").is_some());
}

// =============================================================================
// Sync Token and Fatal Errors
// =============================================================================

#[tokio::test]
async fn test_unreachable_connector_keeps_last_completed_token() {
    let (h, ldap) = setup();
    for (i, uid) in ["u1", "u2", "u3", "u4", "u5"].iter().enumerate() {
        ldap.change(remote_user(uid, &format!("user{i}@example.com")));
    }
    let mut task = pull_task(ConflictAction::AddOrUpdate);
    task.sync_token = Some(SyncToken::new("0"));

    // Third page (offset 4) drops the connection.
    ldap.fail_search_from(Some(4));
    let failed = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("unreachable"));
    assert_eq!(failed.counts.created, 4);
    assert_eq!(
        h.tokens.current(h.tenant, "ldap", &AnyType::User),
        Some(SyncToken::new("4"))
    );

    ldap.fail_search_from(None);
    let resumed = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(resumed.status, ExecutionStatus::Success);
    assert_eq!(resumed.counts.created, 1);
    assert_eq!(ldap.since_tokens().last().cloned().flatten(), Some("4".to_string()));
    assert_eq!(
        h.tokens.current(h.tenant, "ldap", &AnyType::User),
        Some(SyncToken::new("5"))
    );
    assert_eq!(h.store.all(h.tenant).len(), 5);
}

#[tokio::test]
async fn test_unreachable_on_first_page_reports_failure() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.set_unreachable(true);

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::AddOrUpdate), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.items.is_empty());
    assert!(h.tokens.current(h.tenant, "ldap", &AnyType::User).is_none());
}

#[tokio::test]
async fn test_unknown_resource_is_invalid_task() {
    let (h, _ldap) = setup();
    let mut task = pull_task(ConflictAction::AddOrUpdate);
    task.resource = "missing".to_string();

    let err = h
        .engine
        .pull(h.tenant, &task, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::InvalidTask { .. }));
}

#[tokio::test]
async fn test_rule_on_unsearchable_attribute_is_invalid_task() {
    let (h, _ldap) = setup();
    let mut task = pull_task(ConflictAction::AddOrUpdate);
    task.correlation_rule = CorrelationRule::new(vec![CorrelationItem::equals("ext_groups")]);

    let err = h
        .engine
        .pull(h.tenant, &task, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TASK");
}

// =============================================================================
// Task Flags
// =============================================================================

#[tokio::test]
async fn test_dry_run_reports_without_mutating() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.change(remote_user("bob", "bob@example.com"));

    let task = pull_task(ConflictAction::AddOrUpdate).with_flags(TaskFlags {
        dry_run: true,
        ..TaskFlags::default()
    });
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.counts.created, 2);
    assert!(report.items.iter().all(|i| i.message.as_deref() == Some("dry run")));
    assert!(h.store.all(h.tenant).is_empty());
    assert!(h.tokens.current(h.tenant, "ldap", &AnyType::User).is_none());
}

#[tokio::test]
async fn test_disabled_create_is_ignored() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));

    let task = pull_task(ConflictAction::AddOrUpdate).with_flags(TaskFlags {
        perform_create: false,
        ..TaskFlags::default()
    });
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.ignored, 1);
    assert_eq!(report.items[0].operation, Some(DecisionKind::Create));
    assert!(h.store.all(h.tenant).is_empty());
}

#[tokio::test]
async fn test_store_failure_is_item_error_with_remediation() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.change(remote_user("bob", "bob@example.com"));
    h.store.reject_create("bob");

    let task = pull_task(ConflictAction::AddOrUpdate).with_flags(TaskFlags {
        remediation: true,
        ..TaskFlags::default()
    });
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::SuccessWithErrors);
    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.failed, 1);

    let records = h.remediation.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, "bob");
    assert_eq!(
        records[0].reason,
        RemediationReason::ItemFailed {
            error_code: "CONSTRAINT_VIOLATION".to_string()
        }
    );
}

// =============================================================================
// Virtual Attributes
// =============================================================================

#[tokio::test]
async fn test_pull_refreshes_virtual_attribute_cache() {
    let (h, ldap) = setup();
    ldap.change(
        remote_user("alice", "alice@example.com")
            .with_values("memberOf", strings(&["admins", "staff"])),
    );

    h.engine
        .pull(h.tenant, &pull_task(ConflictAction::AddOrUpdate), CancellationToken::new())
        .await
        .unwrap();

    let alice = h.store.by_name(h.tenant, "alice").unwrap();
    assert!(alice.virtual_attrs.is_empty());
    let cached = h.engine.virtual_attributes().get(h.tenant, alice.key).unwrap();
    assert_eq!(cached.get("ext_groups"), Some(&strings(&["admins", "staff"])));
}

// =============================================================================
// Hooks
// =============================================================================

struct Veto(&'static str);

#[async_trait]
impl PullActions for Veto {
    fn name(&self) -> &str {
        "veto"
    }

    async fn before(
        &self,
        _ctx: &HookContext,
        object: &ConnObject,
        _draft: &AnyDraft,
        _decision: DecisionKind,
    ) -> HookResult<HookVerdict> {
        if object.key() == self.0 {
            Ok(HookVerdict::Ignore {
                reason: "vetoed".to_string(),
            })
        } else {
            Ok(HookVerdict::Proceed)
        }
    }
}

struct Forgive;

#[async_trait]
impl PullActions for Forgive {
    fn name(&self) -> &str {
        "forgive"
    }

    async fn on_error(
        &self,
        _ctx: &HookContext,
        _object: &ConnObject,
        _error: &ReconciliationError,
    ) -> HookResult<ErrorVerdict> {
        Ok(ErrorVerdict::Ignore {
            reason: "known bad record".to_string(),
        })
    }
}

#[tokio::test]
async fn test_before_hook_can_veto() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    ldap.change(remote_user("bob", "bob@example.com"));

    let task = pull_task(ConflictAction::AddOrUpdate).with_action(Arc::new(Veto("bob")));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.ignored, 1);
    assert!(h.store.by_name(h.tenant, "bob").is_none());
}

#[tokio::test]
async fn test_error_hook_can_ignore_failure() {
    let (h, ldap) = setup();
    ldap.change(remote_user("bob", "bob@example.com"));
    h.store.reject_create("bob");

    let task = pull_task(ConflictAction::AddOrUpdate).with_action(Arc::new(Forgive));
    let report = h.engine.pull(h.tenant, &task, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.ignored, 1);
    assert_eq!(report.items[0].message.as_deref(), Some("known bad record"));
}

// =============================================================================
// Cancellation and Exclusive Execution
// =============================================================================

struct Gate {
    entered: Arc<Notify>,
    release: CancellationToken,
}

#[async_trait]
impl PullActions for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn preprocess(&self, _ctx: &HookContext, object: ConnObject) -> HookResult<ConnObject> {
        self.entered.notify_one();
        self.release.cancelled().await;
        Ok(object)
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .engine
        .pull(h.tenant, &pull_task(ConflictAction::AddOrUpdate), cancel)
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert!(report.items.is_empty());
    assert!(h.store.all(h.tenant).is_empty());
}

#[tokio::test]
async fn test_concurrent_pull_is_rejected() {
    let (h, ldap) = setup();
    ldap.change(remote_user("alice", "alice@example.com"));

    let entered = Arc::new(Notify::new());
    let release = CancellationToken::new();
    let task = pull_task(ConflictAction::AddOrUpdate).with_action(Arc::new(Gate {
        entered: entered.clone(),
        release: release.clone(),
    }));

    let running = {
        let engine = h.engine.clone();
        let task = task.clone();
        let tenant = h.tenant;
        tokio::spawn(async move { engine.pull(tenant, &task, CancellationToken::new()).await })
    };
    entered.notified().await;

    let plain = pull_task(ConflictAction::AddOrUpdate);
    let err = h
        .engine
        .pull(h.tenant, &plain, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::AlreadyRunning { .. }));

    release.cancel();
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.status, ExecutionStatus::Success);

    // The lock is released with the execution.
    let again = h.engine.pull(h.tenant, &plain, CancellationToken::new()).await;
    assert!(again.is_ok());
}
