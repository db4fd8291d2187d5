mod common;

use {
    chrono::{Duration, Months, Utc},
    common::*,
    sub_sync::{
        adapters::providers,
        domain::{
            audit::AuditOutcome,
            error::PipelineError,
            event::EventKind,
            provider::{Platform, Provider},
            state_machine::RejectReason,
            subscription::{Plan, SubscriptionStatus},
            store::SubscriptionStore,
        },
        services::reconciliation::{RetryPolicy, WebhookOutcome},
    },
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ── end-to-end: purchase, renew, refund ────────────────────────────────────

#[tokio::test]
async fn store_a_lifecycle_buy_renew_refund() {
    let h = Harness::new();
    let u = user("user-1");
    let base = now_ms();

    let buy = providers::normalize(
        Provider::StoreA,
        &store_a_payload("INITIAL_BUY", "L1", "L1", MONTHLY, base, None),
    );
    let WebhookOutcome::Applied(s1) = h.reconciler.reconcile_from_webhook(&u, &buy).await else {
        panic!("purchase not applied");
    };
    assert_eq!(s1.status, SubscriptionStatus::Active);
    assert_eq!(s1.plan, Plan::Monthly);
    let expected = Utc::now().checked_add_months(Months::new(1)).unwrap();
    let expiry = s1.expiry_date.unwrap();
    assert!((expected - expiry).num_seconds().abs() < 5, "expiry {expiry} not ≈ {expected}");

    let renew = providers::normalize(
        Provider::StoreA,
        &store_a_payload("DID_RENEW", "L1", "T2", MONTHLY, base + 1_000, None),
    );
    assert_eq!(renew.kind, EventKind::Renewed);
    let WebhookOutcome::Applied(s2) = h.reconciler.reconcile_from_webhook(&u, &renew).await else {
        panic!("renewal not applied");
    };
    assert_eq!(s2.status, SubscriptionStatus::Active);
    assert_eq!(s2.expiry_date, expiry.checked_add_months(Months::new(1)));
    assert_eq!(s2.latest_transaction_id.as_deref(), Some("T2"));
    assert_eq!(s2.original_transaction_id.as_deref(), Some("L1"));

    let refund = providers::normalize(
        Provider::StoreA,
        &store_a_payload("REFUND", "L1", "T2", MONTHLY, base + 2_000, None),
    );
    let WebhookOutcome::Applied(s3) = h.reconciler.reconcile_from_webhook(&u, &refund).await else {
        panic!("refund not applied");
    };
    assert_eq!(s3.status, SubscriptionStatus::Refunded);
    assert!(s3.refunded);

    let view = h.reconciler.get_status(&u).await.unwrap();
    assert!(!view.is_active);

    let trail = h.store.list_audit(&u, None).await.unwrap();
    assert_eq!(trail.len(), 3);
    assert!(trail.iter().all(|r| r.outcome == AuditOutcome::Applied));
    assert_eq!(trail[2].metadata["old_status"], "active");
    assert_eq!(trail[2].metadata["new_status"], "refunded");
}

// ── end-to-end: lifetime receipt ───────────────────────────────────────────

#[tokio::test]
async fn lifetime_receipt_is_active_forever() {
    let h = Harness::new();
    let u = user("user-8");

    let view = h
        .reconciler
        .reconcile_from_receipt(&u, "opaque-receipt-blob", LIFETIME, Platform::StoreA)
        .await
        .unwrap();
    assert!(view.is_lifetime);
    assert!(view.is_active);
    assert_eq!(view.expiry_date, None);
    assert_eq!(view.plan, Plan::Lifetime);

    let stored = h.store.load(&u).await.unwrap().unwrap();
    let far_future = Utc::now() + Duration::days(365 * 50);
    assert!(stored.status_view(far_future).is_active);
    assert_eq!(stored.platform, Some(Platform::StoreA));

    let trail = h.store.list_audit(&u, Some(EventKind::Purchased)).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].actor, "client:receipt");
}

#[tokio::test]
async fn resubmitted_receipt_changes_nothing() {
    let h = Harness::new();
    let u = user("user-2");
    let first = h
        .reconciler
        .reconcile_from_receipt(&u, "receipt-1", MONTHLY, Platform::StoreB)
        .await
        .unwrap();
    let second = h
        .reconciler
        .reconcile_from_receipt(&u, "receipt-1", MONTHLY, Platform::StoreB)
        .await
        .unwrap();
    assert_eq!(first, second);

    let trail = h.store.list_audit(&u, None).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].outcome, AuditOutcome::Rejected);
    assert_eq!(trail[1].metadata["reason"], "replay");
}

#[tokio::test]
async fn receipt_input_is_validated() {
    let h = Harness::new();
    let u = user("user-3");

    let empty = h
        .reconciler
        .reconcile_from_receipt(&u, "  ", MONTHLY, Platform::StoreA)
        .await;
    assert!(matches!(empty, Err(PipelineError::Validation(_))));

    let unknown = h
        .reconciler
        .reconcile_from_receipt(&u, "r", "mystery-product", Platform::Web)
        .await;
    assert!(matches!(unknown, Err(PipelineError::Validation(_))));

    assert!(h.store.load(&u).await.unwrap().is_none());
}

#[tokio::test]
async fn status_for_unknown_user_is_empty() {
    let h = Harness::new();
    let view = h.reconciler.get_status(&user("nobody")).await.unwrap();
    assert!(!view.is_active);
    assert_eq!(view.plan, Plan::None);
    assert_eq!(view.expiry_date, None);
}

// ── rejections are audited ─────────────────────────────────────────────────

#[tokio::test]
async fn rejected_event_is_audited_without_state_change() {
    let h = Harness::new();
    let u = user("user-4");
    let base = Utc::now();

    let buy = purchased("L1", "L1", MONTHLY, base);
    assert!(matches!(
        h.reconciler.reconcile_from_webhook(&u, &buy).await,
        WebhookOutcome::Applied(_)
    ));
    let before = h.store.load(&u).await.unwrap().unwrap();

    let foreign = event(EventKind::Expired, "OTHER", "OTHER-1", MONTHLY, base + Duration::seconds(5));
    assert!(matches!(
        h.reconciler.reconcile_from_webhook(&u, &foreign).await,
        WebhookOutcome::Rejected(RejectReason::LineageMismatch)
    ));
    assert_eq!(h.store.load(&u).await.unwrap().unwrap(), before);

    let expired = h.store.list_audit(&u, Some(EventKind::Expired)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].outcome, AuditOutcome::Rejected);
    assert_eq!(expired[0].metadata["reason"], "lineage_mismatch");
    assert_eq!(expired[0].transaction_id.as_deref(), Some("OTHER-1"));
}

#[tokio::test]
async fn unknown_kind_is_audited_as_ignored() {
    let h = Harness::new();
    let u = user("user-5");
    let e = event(EventKind::Unknown, "L1", "L1", MONTHLY, Utc::now());
    assert!(matches!(
        h.reconciler.reconcile_from_webhook(&u, &e).await,
        WebhookOutcome::Ignored(RejectReason::UnknownKind)
    ));
    let trail = h.store.list_audit(&u, None).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].outcome, AuditOutcome::Ignored);
    assert!(h.store.load(&u).await.unwrap().is_none());
}

// ── retries ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = Harness::new();
    let u = user("user-6");
    h.store.fail_next_commits(2).await;

    let outcome = h
        .reconciler
        .reconcile_from_webhook(&u, &purchased("L1", "L1", MONTHLY, Utc::now()))
        .await;
    assert!(matches!(outcome, WebhookOutcome::Applied(_)));
    assert_eq!(h.store.list_audit(&u, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_drop_the_event() {
    let h = Harness::new();
    let u = user("user-7");
    h.store.fail_next_commits(3).await;

    let outcome = h
        .reconciler
        .reconcile_from_webhook(&u, &purchased("L1", "L1", MONTHLY, Utc::now()))
        .await;
    assert!(matches!(outcome, WebhookOutcome::Dropped(_)));
    assert!(h.store.load(&u).await.unwrap().is_none());
    assert!(h.store.list_audit(&u, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn permanent_store_error_is_discarded_without_retry() {
    let h = Harness::new();
    let u = user("user-11");
    h.store.set_corrupt(true).await;

    let outcome = h
        .reconciler
        .reconcile_from_webhook(&u, &purchased("L1", "L1", MONTHLY, Utc::now()))
        .await;
    assert!(matches!(outcome, WebhookOutcome::Discarded(_)));

    h.store.set_corrupt(false).await;
    assert!(h.store.load(&u).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn slow_store_times_out_and_drops() {
    let h = Harness::with_retry(RetryPolicy {
        max_attempts: 2,
        base_backoff: std::time::Duration::from_millis(10),
        attempt_timeout: std::time::Duration::from_millis(100),
    });
    h.store.set_commit_delay(Some(std::time::Duration::from_secs(5))).await;
    let u = user("user-9");

    let outcome = h
        .reconciler
        .reconcile_from_webhook(&u, &purchased("L1", "L1", MONTHLY, Utc::now()))
        .await;
    assert!(matches!(outcome, WebhookOutcome::Dropped(_)));
    assert!(h.store.load(&u).await.unwrap().is_none());
}

#[tokio::test]
async fn receipt_path_surfaces_persistence_failure() {
    let h = Harness::new();
    h.store.fail_next_commits(10).await;
    let result = h
        .reconciler
        .reconcile_from_receipt(&user("user-10"), "r", MONTHLY, Platform::StoreA)
        .await;
    assert!(matches!(result, Err(PipelineError::PersistenceFatal(_))));
}

#[test]
fn backoff_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff(1), std::time::Duration::from_millis(50));
    assert_eq!(policy.backoff(2), std::time::Duration::from_millis(100));
    assert_eq!(policy.backoff(3), std::time::Duration::from_millis(200));
    assert_eq!(policy.backoff(20), std::time::Duration::from_secs(2));
}

// ── user resolution ────────────────────────────────────────────────────────

#[tokio::test]
async fn user_resolves_from_account_link_then_lineage() {
    let h = Harness::new();
    let u = user("user-11");

    let linked = providers::normalize(
        Provider::StoreA,
        &store_a_payload("INITIAL_BUY", "L9", "L9", MONTHLY, now_ms(), Some("user-11")),
    );
    assert_eq!(h.reconciler.resolve_user(&linked).await.unwrap(), Some(u.clone()));
    h.reconciler.reconcile_from_webhook(&u, &linked).await;

    let unlinked = providers::normalize(
        Provider::StoreA,
        &store_a_payload("DID_RENEW", "L9", "T10", MONTHLY, now_ms(), None),
    );
    assert_eq!(h.reconciler.resolve_user(&unlinked).await.unwrap(), Some(u));

    let stranger = purchased("L404", "L404", MONTHLY, Utc::now());
    assert_eq!(h.reconciler.resolve_user(&stranger).await.unwrap(), None);
}
