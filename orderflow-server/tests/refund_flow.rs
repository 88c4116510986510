//! Refund lifecycle tests: idempotency, the refundable ceiling, failure
//! retries and the day-level aggregate adjustments.

use std::sync::Arc;

use chrono::Utc;

use common::Harness;
use orderflow_server::analytics::AnalyticsStore;
use orderflow_server::error::WorkflowError;
use orderflow_server::model::{RefundStatus, RefundType};
use orderflow_server::payment::MemoryPaymentSimulator;
use orderflow_server::store::RefundStore;

mod common;

#[tokio::test]
async fn full_refund_defaults_to_order_total() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-full", 1, 10000).await;

    let refund = h
        .refunds
        .request_full_refund(order.id, None, Some("customer return"))
        .await
        .unwrap();
    assert_eq!(refund.amount_cents, 10000);
    assert_eq!(refund.refund_type, RefundType::Full);
    assert_eq!(refund.status, RefundStatus::Pending);

    h.drain().await;

    let refund = h
        .store
        .refund_by_reference(&refund.refund_reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Processed);
    assert!(refund.processed_at.is_some());
    assert_eq!(h.store.processed_total(order.id).await.unwrap(), 10000);
}

#[tokio::test]
async fn partial_refund_type_follows_cumulative_amount() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-part", 1, 10000).await;

    let first = h
        .refunds
        .request_refund(order.id, 4000, None, None)
        .await
        .unwrap();
    assert_eq!(first.refund_type, RefundType::Partial);
    h.drain().await;

    // 4000 processed + 6000 requested covers the total, so this one is full.
    let second = h
        .refunds
        .request_refund(order.id, 6000, None, None)
        .await
        .unwrap();
    assert_eq!(second.refund_type, RefundType::Full);
    h.drain().await;

    assert_eq!(h.store.processed_total(order.id).await.unwrap(), 10000);
}

#[tokio::test]
async fn refund_requests_are_idempotent_on_reference() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-idem", 1, 5000).await;

    let first = h
        .refunds
        .request_refund(order.id, 2000, Some("ref-1".into()), None)
        .await
        .unwrap();
    let second = h
        .refunds
        .request_refund(order.id, 2000, Some("ref-1".into()), None)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    // One execution task, not two.
    assert_eq!(h.queue.pending_len().await, 1);
    h.drain().await;

    let refunds = h.store.refunds_for_order(order.id).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(h.store.processed_total(order.id).await.unwrap(), 2000);
}

#[tokio::test]
async fn over_refund_is_rejected_at_creation() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-over", 1, 10000).await;

    h.refunds
        .request_refund(order.id, 6000, None, None)
        .await
        .unwrap();
    h.drain().await;

    // 6000 already processed: only 4000 remains refundable.
    let err = h
        .refunds
        .request_refund(order.id, 5000, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RefundExceedsRefundable));
    assert!(err.is_permanent());
    assert_eq!(h.store.processed_total(order.id).await.unwrap(), 6000);
}

#[tokio::test]
async fn concurrent_pending_refunds_cannot_jointly_exceed_total() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-race", 1, 10000).await;

    // Both created before either executes: creation-time validation sees
    // zero processed for each, so both are accepted as pending.
    h.refunds
        .request_refund(order.id, 6000, Some("ref-a".into()), None)
        .await
        .unwrap();
    h.refunds
        .request_refund(order.id, 5000, Some("ref-b".into()), None)
        .await
        .unwrap();

    h.drain().await;

    // Execution re-validates: the first wins, the second is marked failed.
    let a = h.store.refund_by_reference("ref-a").await.unwrap().unwrap();
    let b = h.store.refund_by_reference("ref-b").await.unwrap().unwrap();
    assert_eq!(a.status, RefundStatus::Processed);
    assert_eq!(b.status, RefundStatus::Failed);
    assert!(b.failure_reason.is_some());
    assert_eq!(h.store.processed_total(order.id).await.unwrap(), 6000);
}

#[tokio::test]
async fn invalid_amounts_are_rejected() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-bad", 1, 5000).await;

    let err = h
        .refunds
        .request_refund(order.id, 0, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidRefundAmount));

    let err = h
        .refunds
        .request_refund(order.id, -100, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidRefundAmount));
}

#[tokio::test]
async fn failed_refund_is_reset_and_retried() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-retry", 1, 5000).await;

    let refund = h
        .refunds
        .request_refund(order.id, 5000, Some("ref-r".into()), None)
        .await
        .unwrap();
    h.store.mark_failed(refund.id, "gateway timeout").await.unwrap();

    // Redelivery of the execution task picks the failed refund back up.
    h.refunds.execute("ref-r").await.unwrap();

    let refund = h.store.refund_by_reference("ref-r").await.unwrap().unwrap();
    assert_eq!(refund.status, RefundStatus::Processed);
    assert!(refund.failure_reason.is_none());
}

#[tokio::test]
async fn gateway_failure_marks_refund_failed_for_retry() {
    let gateway = Arc::new(MemoryPaymentSimulator::new(1.0));
    let h = Harness::new(gateway);
    let order = h.finalized_order("ord-gw", 1, 5000).await;

    let refund = h
        .refunds
        .request_refund(order.id, 5000, Some("ref-gw".into()), None)
        .await
        .unwrap();

    let err = h.refunds.execute("ref-gw").await.unwrap_err();
    assert!(matches!(err, WorkflowError::GatewayTransientFailure(_)));
    assert!(!err.is_permanent());

    let refund = h
        .store
        .refund_by_reference(&refund.refund_reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Failed);
}

#[tokio::test]
async fn processed_refund_execution_is_a_no_op() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-noop", 1, 5000).await;

    h.refunds
        .request_refund(order.id, 5000, Some("ref-n".into()), None)
        .await
        .unwrap();
    h.drain().await;

    // Redelivered task: no double execution, aggregates unchanged.
    h.refunds.execute("ref-n").await.unwrap();

    let day = Utc::now().date_naive();
    let kpis = h.analytics.daily_kpis(day).await.unwrap();
    assert_eq!(kpis.refund_count, 1);
    assert_eq!(kpis.refund_amount_cents, 5000);
}

#[tokio::test]
async fn refund_adjusts_kpis_with_gross_average_order_value() {
    let h = Harness::reliable();
    let order = h.finalized_order("ord-kpi", 7, 2999).await;

    h.refunds.request_full_refund(order.id, None, None).await.unwrap();
    h.drain().await;

    let day = Utc::now().date_naive();
    let kpis = h.analytics.daily_kpis(day).await.unwrap();
    assert_eq!(kpis.revenue_cents, 0);
    assert_eq!(kpis.order_count, 1);
    assert_eq!(kpis.refund_count, 1);
    assert_eq!(kpis.refund_amount_cents, 2999);
    // Average order value is gross of refunds.
    assert_eq!(kpis.average_order_value_cents, 2999);

    let top = h.analytics.top_customers(10).await.unwrap();
    assert_eq!(top[0].customer_id, 7);
    assert_eq!(top[0].score_cents, 0);
}
