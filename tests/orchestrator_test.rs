mod common;

use chrono::{Duration, Utc};
use common::{Harness, METHOD, OTHER_PAYER_ID};
use futures::future::join_all;
use paygate_core::db::audit::ACTION_STATUS_CHANGED;
use paygate_core::domain::{Caller, PaymentError, RegistrationStatus, TransactionStatus};
use paygate_core::ports::GatewayError;
use paygate_core::services::sweep_once;
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_share_one_gateway_request() {
    let h = Harness::new().await;
    h.gateway.set_delay(std::time::Duration::from_millis(200));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = h.orchestrator.clone();
            let caller = h.payer();
            let item = h.item;
            tokio::spawn(async move { orchestrator.create(&caller, item, METHOD).await })
        })
        .collect();

    let views: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let refs: HashSet<_> = views.iter().map(|v| v.order_ref.clone()).collect();
    assert_eq!(refs.len(), 1);
    assert!(views.iter().all(|v| v.gateway_reference.as_deref() == Some("REF1")));
    assert_eq!(h.gateway.requests(), 1);
    assert_eq!(h.store.transactions_for(h.registration.id).await.len(), 1);
}

#[tokio::test]
async fn test_repeated_create_within_expiry_reuses_order_ref() {
    let h = Harness::new().await;

    let first = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    let second = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    assert_eq!(first.order_ref, second.order_ref);
    assert_eq!(first.payment_url, second.payment_url);
    assert_eq!(first.amount, "150000");
    assert!(first.order_ref.starts_with("TRX-42-X7-"));
    assert_eq!(h.gateway.requests(), 1);

    let registration = h.store.registration(h.registration.id).await.unwrap();
    assert_eq!(registration.transaction_id, Some(first.transaction_id));
}

#[tokio::test]
async fn test_success_callback_pays_registration_and_issues_receipt() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    let outcome = h.orchestrator.handle_callback(&callback).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.transaction.status, TransactionStatus::Success);
    assert_eq!(outcome.transaction.gateway_reference.as_deref(), Some("REF1"));
    assert!(outcome.transaction.paid_at.is_some());
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Paid
    );

    let payload = outcome.transaction.callback_payload.unwrap();
    assert_ne!(payload["signature"], callback.signature.as_str());

    let receipt = h
        .orchestrator
        .get_payment_detail(&h.payer(), view.transaction_id)
        .await
        .unwrap();
    assert_eq!(receipt.order_ref, view.order_ref);
    assert_eq!(receipt.amount, "150000");
    assert_eq!(
        receipt.proof_path,
        Some(format!("proofs/{}.svg", view.transaction_id))
    );
    assert_eq!(h.proofs.calls(), 1);
}

#[tokio::test]
async fn test_duplicate_callback_is_acknowledged_without_change() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");

    assert!(h.orchestrator.handle_callback(&callback).await.unwrap().changed);
    let again = h.orchestrator.handle_callback(&callback).await.unwrap();

    assert!(!again.changed);
    assert_eq!(again.transaction.status, TransactionStatus::Success);
    assert_eq!(h.proofs.calls(), 1);

    let transitions = h
        .store
        .audit_entries(view.transaction_id)
        .await
        .into_iter()
        .filter(|entry| entry.action == ACTION_STATUS_CHANGED)
        .count();
    assert_eq!(transitions, 1);
}

#[tokio::test]
async fn test_late_failure_callback_does_not_undo_payment() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let paid = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    h.orchestrator.handle_callback(&paid).await.unwrap();

    let failed = h.signed_callback(&view.order_ref, "150000", "02", "REF1");
    let outcome = h.orchestrator.handle_callback(&failed).await.unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.transaction.status, TransactionStatus::Success);
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Paid
    );
}

#[tokio::test]
async fn test_tampered_amount_fails_signature_check() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let mut callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    callback.amount = "1".to_string();

    let err = h.orchestrator.handle_callback(&callback).await.unwrap_err();
    assert!(matches!(err, PaymentError::SignatureInvalid));

    let status = h.orchestrator.check_status(&h.payer(), &view.order_ref).await.unwrap();
    assert_eq!(status.status, TransactionStatus::Pending);
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Registered
    );
}

#[tokio::test]
async fn test_forged_and_foreign_merchant_callbacks_are_rejected() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let mut forged = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    forged.signature = "0".repeat(32);
    assert!(matches!(
        h.orchestrator.handle_callback(&forged).await,
        Err(PaymentError::SignatureInvalid)
    ));

    let mut foreign = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    foreign.merchant_code = Some("D9999".to_string());
    assert!(matches!(
        h.orchestrator.handle_callback(&foreign).await,
        Err(PaymentError::SignatureInvalid)
    ));

    let mut empty = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    empty.signature = String::new();
    assert!(h.orchestrator.handle_callback(&empty).await.is_err());

    assert!(h.store.audit_entries(view.transaction_id).await.iter().all(|e| e.action != ACTION_STATUS_CHANGED));
}

#[tokio::test]
async fn test_signed_callback_with_wrong_amount_is_rejected() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let callback = h.signed_callback(&view.order_ref, "1000", "00", "REF1");
    let err = h.orchestrator.handle_callback(&callback).await.unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    let equivalent = h.signed_callback(&view.order_ref, "150000.00", "00", "REF1");
    let outcome = h.orchestrator.handle_callback(&equivalent).await.unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_callback_for_unknown_order_is_not_found() {
    let h = Harness::new().await;
    let callback = h.signed_callback("TRX-42-X7-1", "150000", "00", "REF1");

    let err = h.orchestrator.handle_callback(&callback).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));
}

#[tokio::test]
async fn test_failed_callback_cancels_registration_and_allows_new_attempt() {
    let h = Harness::new().await;
    let first = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let callback = h.signed_callback(&first.order_ref, "150000", "02", "REF1");
    let outcome = h.orchestrator.handle_callback(&callback).await.unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Failed);
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Cancelled
    );
    assert_eq!(h.proofs.calls(), 0);

    let second = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    assert_ne!(second.order_ref, first.order_ref);
    assert_eq!(second.gateway_reference.as_deref(), Some("REF2"));
    assert_eq!(h.store.transactions_for(h.registration.id).await.len(), 2);
}

#[tokio::test]
async fn test_expired_transaction_reads_expired_and_is_superseded() {
    let h = Harness::new().await;
    let first = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    h.store
        .set_expires_at(first.transaction_id, Utc::now() - Duration::seconds(1))
        .await;

    let status = h.orchestrator.check_status(&h.payer(), &first.order_ref).await.unwrap();
    assert_eq!(status.status, TransactionStatus::Expired);

    let second = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    assert_ne!(second.order_ref, first.order_ref);
    assert_eq!(h.gateway.requests(), 2);

    let history = h.store.transactions_for(h.registration.id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, TransactionStatus::Expired);
    assert_eq!(history[1].status, TransactionStatus::Pending);
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Registered
    );
}

#[tokio::test]
async fn test_callback_after_deadline_still_settles_stored_pending() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    h.store
        .set_expires_at(view.transaction_id, Utc::now() - Duration::seconds(30))
        .await;

    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    let outcome = h.orchestrator.handle_callback(&callback).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.transaction.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_status_check_reconciles_lost_callback() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    h.gateway.report_status("00", Some("REF1"));

    let status = h.orchestrator.check_status(&h.payer(), &view.order_ref).await.unwrap();

    assert_eq!(status.status, TransactionStatus::Success);
    assert_eq!(status.gateway_reference.as_deref(), Some("REF1"));
    assert!(status.proof_path.is_some());
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Paid
    );

    // Settled transactions are not queried again.
    h.orchestrator.check_status(&h.payer(), &view.order_ref).await.unwrap();
    assert_eq!(h.gateway.status_queries(), 1);
}

#[tokio::test]
async fn test_status_check_keeps_pending_while_gateway_waits() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let status = h.orchestrator.check_status(&h.payer(), &view.order_ref).await.unwrap();
    assert_eq!(status.status, TransactionStatus::Pending);

    h.gateway.status_unavailable();
    let status = h.orchestrator.check_status(&h.payer(), &view.order_ref).await.unwrap();
    assert_eq!(status.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_status_check_reconciles_gateway_failure() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    h.gateway.report_status("02", None);

    let status = h.orchestrator.check_status(&h.payer(), &view.order_ref).await.unwrap();
    assert_eq!(status.status, TransactionStatus::Failed);
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Cancelled
    );
}

#[tokio::test]
async fn test_gateway_outage_leaves_transaction_retryable() {
    let h = Harness::new().await;
    h.gateway
        .fail_next(GatewayError::Unavailable("timeout".to_string()));

    let err = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap_err();
    assert!(matches!(err, PaymentError::GatewayUnavailable(_)));
    assert!(err.is_retryable());

    let history = h.store.transactions_for(h.registration.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Pending);
    assert!(history[0].gateway_claimed_at.is_none());

    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    assert_eq!(view.order_ref, history[0].order_ref);
    assert_eq!(view.gateway_reference.as_deref(), Some("REF2"));
    assert_eq!(h.gateway.requests(), 2);
    assert_eq!(h.store.transactions_for(h.registration.id).await.len(), 1);
}

#[tokio::test]
async fn test_gateway_rejection_is_reported() {
    let h = Harness::new().await;
    h.gateway
        .fail_next(GatewayError::Rejected("invalid merchant".to_string()));

    let err = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap_err();
    assert!(matches!(err, PaymentError::GatewayRejected(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_gateway_acknowledgement_after_override_is_discarded() {
    let h = Harness::new().await;
    h.gateway.set_delay(std::time::Duration::from_millis(200));

    let orchestrator = h.orchestrator.clone();
    let (caller, item) = (h.payer(), h.item);
    let create = tokio::spawn(async move { orchestrator.create(&caller, item, METHOD).await });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let pending = h.store.transactions_for(h.registration.id).await;
    assert_eq!(pending.len(), 1);
    h.orchestrator
        .admin_override(
            &Caller::admin(1),
            pending[0].id,
            TransactionStatus::Failed,
            "payer walked away",
        )
        .await
        .unwrap();

    let err = create.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::GatewayUnavailable(_)));

    let stored = h.store.transactions_for(h.registration.id).await.remove(0);
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert!(stored.gateway_reference.is_none());
    assert!(stored.gateway_claimed_at.is_none());
}

#[tokio::test]
async fn test_create_refuses_settled_registration() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    h.orchestrator.handle_callback(&callback).await.unwrap();

    let err = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap_err();
    assert!(matches!(err, PaymentError::AlreadyPaid(_)));

    h.store
        .set_registration_status(h.registration.id, RegistrationStatus::Attended)
        .await;
    let err = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap_err();
    assert!(matches!(err, PaymentError::AlreadyPaid(_)));
    assert_eq!(h.gateway.requests(), 1);
}

#[tokio::test]
async fn test_create_validates_catalog_and_registration() {
    let h = Harness::new().await;

    let err = h.orchestrator.create(&h.payer(), h.item, "OV").await.unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    let err = h.orchestrator.create(&h.payer(), h.item, "ZZ").await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));

    let err = h.orchestrator.create(&h.payer(), h.item, "vc;drop").await.unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    let unknown_item = paygate_core::domain::ItemRef::new(h.item.kind, 999);
    let err = h.orchestrator.create(&h.payer(), unknown_item, METHOD).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));

    let stranger = Caller::member(OTHER_PAYER_ID);
    let err = h.orchestrator.create(&stranger, h.item, METHOD).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));
    assert_eq!(h.gateway.requests(), 0);
}

#[tokio::test]
async fn test_other_payers_cannot_read_transaction() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    let stranger = Caller::member(OTHER_PAYER_ID);

    let err = h.orchestrator.check_status(&stranger, &view.order_ref).await.unwrap_err();
    assert!(matches!(err, PaymentError::Forbidden(_)));

    let admin = Caller::admin(1);
    let status = h.orchestrator.check_status(&admin, &view.order_ref).await.unwrap();
    assert_eq!(status.order_ref, view.order_ref);
}

#[tokio::test]
async fn test_receipt_only_for_successful_payments() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let err = h
        .orchestrator
        .get_payment_detail(&h.payer(), view.transaction_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));

    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    h.orchestrator.handle_callback(&callback).await.unwrap();

    let err = h
        .orchestrator
        .get_payment_detail(&Caller::member(OTHER_PAYER_ID), view.transaction_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Forbidden(_)));

    let receipt = h
        .orchestrator
        .get_payment_detail(&Caller::admin(1), view.transaction_id)
        .await
        .unwrap();
    assert_eq!(receipt.gateway_reference.as_deref(), Some("REF1"));

    let err = h
        .orchestrator
        .get_payment_detail(&h.payer(), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound(_)));
}

#[tokio::test]
async fn test_proof_failure_does_not_block_payment() {
    let h = Harness::new().await;
    h.proofs.set_failing(true);
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();

    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    let outcome = h.orchestrator.handle_callback(&callback).await.unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Success);
    assert!(outcome.transaction.proof_path.is_none());

    let receipt = h
        .orchestrator
        .get_payment_detail(&h.payer(), view.transaction_id)
        .await
        .unwrap();
    assert!(receipt.proof_path.is_none());

    h.proofs.set_failing(false);
    let receipt = h
        .orchestrator
        .get_payment_detail(&h.payer(), view.transaction_id)
        .await
        .unwrap();
    assert!(receipt.proof_path.is_some());
    assert_eq!(h.proofs.calls(), 3);
}

#[tokio::test]
async fn test_admin_override_rules() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    let admin = Caller::admin(1);

    let err = h
        .orchestrator
        .admin_override(&h.payer(), view.transaction_id, TransactionStatus::Success, "paid in cash")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Forbidden(_)));

    let err = h
        .orchestrator
        .admin_override(&admin, view.transaction_id, TransactionStatus::Success, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    let err = h
        .orchestrator
        .admin_override(&admin, view.transaction_id, TransactionStatus::Pending, "reopen")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    let status = h
        .orchestrator
        .admin_override(&admin, view.transaction_id, TransactionStatus::Success, "paid in cash")
        .await
        .unwrap();
    assert_eq!(status.status, TransactionStatus::Success);
    assert!(status.proof_path.is_some());
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Paid
    );

    let entry = h
        .store
        .audit_entries(view.transaction_id)
        .await
        .into_iter()
        .find(|entry| entry.action == ACTION_STATUS_CHANGED)
        .unwrap();
    assert_eq!(entry.actor, "admin:1");
    assert_eq!(entry.new_val.unwrap()["notes"], "paid in cash");

    let same = h
        .orchestrator
        .admin_override(&admin, view.transaction_id, TransactionStatus::Success, "again")
        .await
        .unwrap();
    assert_eq!(same.status, TransactionStatus::Success);

    let err = h
        .orchestrator
        .admin_override(&admin, view.transaction_id, TransactionStatus::Failed, "reversal")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_sweeper_persists_expiry() {
    let h = Harness::new().await;
    let view = h.orchestrator.create(&h.payer(), h.item, METHOD).await.unwrap();
    h.store
        .set_expires_at(view.transaction_id, Utc::now() - Duration::minutes(1))
        .await;

    assert_eq!(sweep_once(&h.orchestrator).await.unwrap(), 1);
    assert_eq!(sweep_once(&h.orchestrator).await.unwrap(), 0);

    let history = h.store.transactions_for(h.registration.id).await;
    assert_eq!(history[0].status, TransactionStatus::Expired);
    assert_eq!(
        h.store.registration(h.registration.id).await.unwrap().status,
        RegistrationStatus::Registered
    );

    let callback = h.signed_callback(&view.order_ref, "150000", "00", "REF1");
    let outcome = h.orchestrator.handle_callback(&callback).await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(outcome.transaction.status, TransactionStatus::Expired);
}
