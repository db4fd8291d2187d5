mod common;

use {
    chrono::{Duration, Months, Utc},
    common::*,
    sub_sync::{
        domain::{
            event::{EventKind, EventSource},
            provider::{Platform, Provider},
            state_machine::RejectReason,
            store::SubscriptionStore,
            subscription::SubscriptionStatus,
        },
        services::reconciliation::{RetryPolicy, WebhookOutcome},
    },
};

fn patient_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 20,
        base_backoff: std::time::Duration::from_millis(1),
        attempt_timeout: std::time::Duration::from_secs(1),
    }
}

// 10 tasks deliver the same purchase. Exactly one applies, the rest replay.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_deliveries() {
    let h = Harness::new();
    let u = user("user-dup");
    let e = purchased("L1", "L1", MONTHLY, Utc::now());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let reconciler = h.reconciler.clone();
        let (u, e) = (u.clone(), e.clone());
        handles.push(tokio::spawn(async move {
            reconciler.reconcile_from_webhook(&u, &e).await
        }));
    }

    let mut applied = 0;
    let mut replays = 0;
    for handle in handles {
        match handle.await.unwrap() {
            WebhookOutcome::Applied(_) => applied += 1,
            WebhookOutcome::Rejected(RejectReason::Replay) => replays += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(replays, 9);

    let s = h.store.load(&u).await.unwrap().unwrap();
    assert_eq!(s.version, 1);
    assert_eq!(h.store.list_audit(&u, None).await.unwrap().len(), 10);
}

// Distinct renewals race. None is lost: each extends expiry by one cadence.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_renewals_are_linearized() {
    let h = Harness::with_retry(patient_retry());
    let u = user("user-renew");
    let start = Utc::now();

    let WebhookOutcome::Applied(initial) = h
        .reconciler
        .reconcile_from_webhook(&u, &purchased("L1", "L1", MONTHLY, start))
        .await
    else {
        panic!("purchase not applied");
    };

    const RENEWALS: usize = 8;
    let mut handles = Vec::new();
    for i in 0..RENEWALS {
        let reconciler = h.reconciler.clone();
        let u = u.clone();
        let e = event(EventKind::Renewed, "L1", &format!("T{i}"), MONTHLY, start + Duration::seconds(1));
        handles.push(tokio::spawn(async move {
            reconciler.reconcile_from_webhook(&u, &e).await
        }));
    }
    for handle in handles {
        assert!(matches!(handle.await.unwrap(), WebhookOutcome::Applied(_)));
    }

    let expected = (0..RENEWALS).try_fold(initial.expiry_date.unwrap(), |exp, _| {
        exp.checked_add_months(Months::new(1))
    });
    let s = h.store.load(&u).await.unwrap().unwrap();
    assert_eq!(s.expiry_date, expected);
    assert_eq!(s.version, 1 + RENEWALS as i64);
    assert_eq!(s.status, SubscriptionStatus::Active);
}

// Receipt and webhook for the same purchase race for one user.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn receipt_and_webhook_race_apply_once() {
    let h = Harness::with_retry(patient_retry());
    let u = user("user-race");

    let mut webhook = purchased("tok-1", "tok-1", MONTHLY, Utc::now());
    webhook.source = EventSource::Webhook(Provider::StoreB);

    let from_webhook = {
        let (reconciler, u) = (h.reconciler.clone(), u.clone());
        tokio::spawn(async move { reconciler.reconcile_from_webhook(&u, &webhook).await })
    };
    let from_client = {
        let (reconciler, u) = (h.reconciler.clone(), u.clone());
        tokio::spawn(async move {
            reconciler
                .reconcile_from_receipt(&u, "tok-1", MONTHLY, Platform::StoreB)
                .await
        })
    };

    let webhook_outcome = from_webhook.await.unwrap();
    let view = from_client.await.unwrap().unwrap();
    assert!(view.is_active);

    let s = h.store.load(&u).await.unwrap().unwrap();
    assert_eq!(s.version, 1);
    assert_eq!(s.original_transaction_id.as_deref(), Some("tok-1"));

    let trail = h.store.list_audit(&u, None).await.unwrap();
    assert_eq!(trail.len(), 2);
    let applied = trail
        .iter()
        .filter(|r| r.outcome == sub_sync::domain::audit::AuditOutcome::Applied)
        .count();
    assert_eq!(applied, 1);
    assert!(matches!(
        webhook_outcome,
        WebhookOutcome::Applied(_) | WebhookOutcome::Rejected(RejectReason::Replay)
    ));
}

// One user's failures do not leak into another's.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn users_are_independent() {
    let h = Harness::new();
    let mut handles = Vec::new();
    for i in 0..20 {
        let reconciler = h.reconciler.clone();
        handles.push(tokio::spawn(async move {
            let u = user(&format!("user-{i}"));
            let lineage = format!("L{i}");
            reconciler
                .reconcile_from_webhook(&u, &purchased(&lineage, &lineage, YEARLY, Utc::now()))
                .await
        }));
    }
    for handle in handles {
        assert!(matches!(handle.await.unwrap(), WebhookOutcome::Applied(_)));
    }
    for i in 0..20 {
        let s = h.store.load(&user(&format!("user-{i}"))).await.unwrap().unwrap();
        assert_eq!(s.original_transaction_id, Some(format!("L{i}")));
    }
}
