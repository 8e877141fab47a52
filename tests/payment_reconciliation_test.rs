mod common;

use assert_matches::assert_matches;
use common::{seed_bundle, seed_parent, seed_settings, seed_student, wait_until, TestApp};
use rust_decimal_macros::dec;
use std::time::Duration;
use uniform_store_api::{
    entities::{order::TransactionStatus, payment::PaymentStatus},
    errors::ServiceError,
    services::cart::AddBundleToCartInput,
    services::orders::{OrderPlacement, PlaceOrderInput},
};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Seeds a parent/student/bundle, fills the cart, and places an order.
/// Returns (order_id, parent_id).
async fn place_order(app: &TestApp) -> (Uuid, i64) {
    seed_settings(app, true).await;
    let parent = seed_parent(app, "Meera", "9876543210", &["USID-001"]).await;
    let student = seed_student(app, "USID-001", "Asha").await;
    let bundle = seed_bundle(app, "Girls Kit", dec!(450)).await;

    app.state
        .services
        .cart
        .add_bundle_to_cart(AddBundleToCartInput {
            parent_id: parent.id,
            bundle_id: bundle.id,
            student_id: student.id,
            quantity: 2,
        })
        .await
        .expect("cart add should succeed");

    let placement = app
        .state
        .services
        .orders
        .place_order_from_cart(PlaceOrderInput {
            parent_id: parent.id,
            shipping_method: "school".to_string(),
            payment_method: uniform_store_api::entities::payment::PaymentMethod::Direct,
            is_address_edited: false,
            delivery_address: None,
        })
        .await
        .expect("placement should succeed");

    match placement {
        OrderPlacement::Placed(details) => (details.order.id, parent.id),
        other => panic!("expected placed order, got {:?}", other),
    }
}

fn captured_payload(order_id: Uuid) -> serde_json::Value {
    serde_json::json!({
        "order_code": order_id.to_string(),
        "bank_reference_id": "BRN-42",
        "application_code": "APP-7",
        "transaction_timestamp": "2025-06-01T10:00:00Z",
        "gateway_batch": "B-77",
        "cartItems": [
            { "student": { "usid": "USID-001", "studentName": "Asha" } }
        ]
    })
}

#[tokio::test]
async fn mark_paid_confirms_payment_and_clears_cart() {
    let app = TestApp::new().await;
    let (order_id, parent_id) = place_order(&app).await;
    let payload = captured_payload(order_id);

    let outcome = app
        .state
        .services
        .payments
        .mark_paid(payload.clone())
        .await
        .expect("reconciliation should succeed");
    assert_eq!(outcome.payment_status, PaymentStatus::Paid);

    let payment = app
        .state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(payment.external_reference.as_deref(), Some("BRN-42"));
    assert_eq!(payment.application_code.as_deref(), Some("APP-7"));
    // The whole inbound payload is kept verbatim, unknown fields included
    assert_eq!(payment.raw, payload);

    let orders = app
        .state
        .services
        .orders
        .find_by_parent(parent_id)
        .await
        .unwrap();
    assert_eq!(
        orders[0].order.transaction_status,
        TransactionStatus::Paid
    );

    // The cart is purged only here, after confirmed payment
    let cart = app.state.services.cart.get_cart(parent_id).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn duplicate_mark_paid_converges_by_overwrite() {
    let app = TestApp::new().await;
    let (order_id, parent_id) = place_order(&app).await;
    let payload = captured_payload(order_id);

    for _ in 0..2 {
        app.state
            .services
            .payments
            .mark_paid(payload.clone())
            .await
            .expect("replayed webhook must not error");
    }

    let payment = app
        .state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);

    let cart = app.state.services.cart.get_cart(parent_id).await.unwrap();
    assert!(cart.items.is_empty(), "clearing an empty cart is a no-op");
}

#[tokio::test]
async fn mark_failed_leaves_cart_for_retry() {
    let app = TestApp::new().await;
    let (order_id, parent_id) = place_order(&app).await;

    let payload = serde_json::json!({
        "order_code": order_id.to_string(),
        "error": { "message": "insufficient funds" }
    });

    let outcome = app
        .state
        .services
        .payments
        .mark_failed(payload.clone())
        .await
        .expect("reconciliation should succeed");
    assert_eq!(outcome.payment_status, PaymentStatus::Failed);

    let payment = app
        .state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.raw, payload);

    let cart = app.state.services.cart.get_cart(parent_id).await.unwrap();
    assert_eq!(cart.items.len(), 1, "failed payment keeps the cart intact");
}

#[tokio::test]
async fn mark_closed_records_abandonment_without_notification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = TestApp::with_sms_base_url(&server.uri()).await;
    let (order_id, parent_id) = place_order(&app).await;

    let payload = serde_json::json!({
        "order_code": order_id.to_string(),
        "event": "checkout.closed"
    });

    app.state
        .services
        .payments
        .mark_closed(payload)
        .await
        .expect("reconciliation should succeed");

    let payment = app
        .state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.event.as_deref(), Some("checkout.closed"));

    let cart = app.state.services.cart.get_cart(parent_id).await.unwrap();
    assert_eq!(cart.items.len(), 1, "abandonment keeps the cart intact");

    // No SMS for abandoned checkouts
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_order_code_is_not_found() {
    let app = TestApp::new().await;
    seed_settings(&app, true).await;

    for order_code in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
        let err = app
            .state
            .services
            .payments
            .mark_paid(serde_json::json!({ "order_code": order_code }))
            .await
            .expect_err("no payment for this code");
        assert_matches!(err, ServiceError::NotFound(_));
    }
}

#[tokio::test]
async fn mark_paid_sends_sms_to_the_students_parent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = TestApp::with_sms_base_url(&server.uri()).await;
    let (order_id, _) = place_order(&app).await;

    app.state
        .services
        .payments
        .mark_paid(captured_payload(order_id))
        .await
        .expect("reconciliation should succeed");

    let delivered = wait_until(Duration::from_secs(2), || async {
        !server.received_requests().await.unwrap().is_empty()
    })
    .await;
    assert!(delivered, "success SMS should reach the gateway");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let query = requests[0].url.query().unwrap_or_default().to_string();
    assert!(query.contains("number=919876543210"), "query was: {}", query);
    assert!(query.contains("APIKey=test-key"));
}

#[tokio::test]
async fn sms_failure_does_not_affect_committed_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let app = TestApp::with_sms_base_url(&server.uri()).await;
    let (order_id, parent_id) = place_order(&app).await;

    app.state
        .services
        .payments
        .mark_paid(captured_payload(order_id))
        .await
        .expect("gateway failure must not fail reconciliation");

    let payment = app
        .state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);

    let cart = app.state.services.cart.get_cart(parent_id).await.unwrap();
    assert!(cart.items.is_empty());
}
