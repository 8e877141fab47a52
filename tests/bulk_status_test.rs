mod common;

use common::{seed_order, seed_parent, seed_payment, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uniform_store_api::{
    entities::{
        order::{OrderStatus, SettlementStatus, TransactionStatus},
        payment::PaymentStatus,
        Order, Payment,
    },
    services::orders::{
        BulkOrderStatusItem, BulkTransactionItem, BulkUpdateOrderStatusInput,
        BulkUpdateTransactionStatusInput,
    },
};
use uuid::Uuid;

#[tokio::test]
async fn partial_failure_updates_the_rest() {
    let app = TestApp::new().await;
    let parent = seed_parent(&app, "Meera", "9876543210", &[]).await;
    let mut orders = Vec::new();
    for _ in 0..3 {
        orders.push(seed_order(&app, parent.id, dec!(450)).await);
    }

    let mut transactions: Vec<BulkOrderStatusItem> = orders
        .iter()
        .map(|o| BulkOrderStatusItem {
            order_id: o.id,
            status: OrderStatus::Shipped,
            tracking_id: Some(format!("TRK-{}", o.id)),
        })
        .collect();
    transactions.push(BulkOrderStatusItem {
        order_id: Uuid::new_v4(),
        status: OrderStatus::Shipped,
        tracking_id: None,
    });

    let outcome = app
        .state
        .services
        .orders
        .bulk_update_status(BulkUpdateOrderStatusInput { transactions })
        .await
        .expect("bulk update always returns an outcome");

    assert!(outcome.success, "three of four succeeded");
    assert_eq!(outcome.updated, 3);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.results.len(), 4);

    let failed: Vec<_> = outcome.results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap_or("").contains("not found"));

    for order in &orders {
        let updated = Order::find_by_id(order.id)
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Shipped);
        assert_eq!(updated.tracking_id, Some(format!("TRK-{}", order.id)));
    }
}

#[tokio::test]
async fn all_unknown_ids_reports_failure() {
    let app = TestApp::new().await;

    let transactions = (0..3)
        .map(|_| BulkOrderStatusItem {
            order_id: Uuid::new_v4(),
            status: OrderStatus::Delivered,
            tracking_id: None,
        })
        .collect();

    let outcome = app
        .state
        .services
        .orders
        .bulk_update_status(BulkUpdateOrderStatusInput { transactions })
        .await
        .unwrap();

    assert!(!outcome.success, "every item failed");
    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.failed, 3);
}

#[tokio::test]
async fn tracking_id_is_only_set_when_present() {
    let app = TestApp::new().await;
    let parent = seed_parent(&app, "Meera", "9876543210", &[]).await;
    let order = seed_order(&app, parent.id, dec!(450)).await;

    app.state
        .services
        .orders
        .bulk_update_status(BulkUpdateOrderStatusInput {
            transactions: vec![BulkOrderStatusItem {
                order_id: order.id,
                status: OrderStatus::Shipped,
                tracking_id: None,
            }],
        })
        .await
        .unwrap();

    let updated = Order::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Shipped);
    assert_eq!(updated.tracking_id, None, "absent field left untouched");
}

#[tokio::test]
async fn transaction_variant_mirrors_latest_payment() {
    let app = TestApp::new().await;
    let parent = seed_parent(&app, "Meera", "9876543210", &[]).await;
    let order = seed_order(&app, parent.id, dec!(450)).await;
    let payment = seed_payment(&app, order.id, dec!(450)).await;

    let outcome = app
        .state
        .services
        .orders
        .bulk_update_transaction_status(BulkUpdateTransactionStatusInput {
            transactions: vec![
                BulkTransactionItem {
                    order_id: order.id,
                    status: TransactionStatus::Paid,
                    settlement_status: SettlementStatus::Settled,
                    application_code: Some("APP-9".to_string()),
                },
                BulkTransactionItem {
                    order_id: Uuid::new_v4(),
                    status: TransactionStatus::Paid,
                    settlement_status: SettlementStatus::Settled,
                    application_code: None,
                },
            ],
        })
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.failed, 1);

    let updated_order = Order::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated_order.transaction_status, TransactionStatus::Paid);
    assert_eq!(updated_order.settlement_status, SettlementStatus::Settled);

    let updated_payment = Payment::find_by_id(payment.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated_payment.status, PaymentStatus::Paid);
    assert_eq!(updated_payment.application_code.as_deref(), Some("APP-9"));
}
