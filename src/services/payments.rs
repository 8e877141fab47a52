use crate::{
    config::PaymentProviderConfig,
    db::DbPool,
    entities::{
        order,
        order::TransactionStatus,
        order_item, payment,
        payment::PaymentStatus,
        Order, OrderItem, Parent, Student,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{OrderOutcomeNotice, PaymentNotifier},
    services::cart::clear_items_for_parent,
    services::orders::latest_payment,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Payment reconciliation service.
///
/// Each handler wraps one transaction of the same shape: locate the order's
/// latest payment, overwrite its status fields and raw audit payload, and
/// move the owning order's transaction status in the same commit. Replayed
/// gateway events converge by overwrite, so duplicate deliveries are
/// harmless.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    notifier: PaymentNotifier,
    provider: PaymentProviderConfig,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        notifier: PaymentNotifier,
        provider: PaymentProviderConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifier,
            provider,
        }
    }

    /// Confirms a captured payment.
    ///
    /// This is the only point where the parent's cart is purged; a cart that
    /// is already gone counts as cleared. Success SMS per affected student is
    /// dispatched after the commit and cannot roll it back.
    #[instrument(skip(self, payload))]
    pub async fn mark_paid(
        &self,
        payload: serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let event = parse_event(&payload)?;
        let order_id = parse_order_code(&event.order_code)?;

        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id, &event.order_code).await?;
        let pay = find_latest_payment(&txn, order_id, &event.order_code).await?;

        let mut pay: payment::ActiveModel = pay.into();
        pay.status = Set(PaymentStatus::Paid);
        pay.external_reference = Set(event.bank_reference_id.clone());
        pay.application_code = Set(event.application_code.clone());
        pay.raw = Set(payload);
        pay.updated_at = Set(Utc::now());
        pay.update(&txn).await?;

        let parent_id = order.parent_id;
        let mut order: order::ActiveModel = order.into();
        order.transaction_status = Set(TransactionStatus::Paid);
        order.updated_at = Set(Utc::now());
        order.update(&txn).await?;

        let cleared = clear_items_for_parent(&txn, parent_id).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentCaptured(order_id))
            .await;
        info!(order_id = %order_id, cleared_items = cleared, "Payment captured");

        self.notifier
            .dispatch_order_outcome(notices_from(event.cart_items), true);

        Ok(ReconciliationOutcome {
            order_id,
            payment_status: PaymentStatus::Paid,
        })
    }

    /// Records a failed payment. The cart is left untouched so the parent
    /// can retry.
    #[instrument(skip(self, payload))]
    pub async fn mark_failed(
        &self,
        payload: serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let event = parse_event(&payload)?;
        let order_id = parse_order_code(&event.order_code)?;

        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id, &event.order_code).await?;
        let pay = find_latest_payment(&txn, order_id, &event.order_code).await?;

        let mut pay: payment::ActiveModel = pay.into();
        pay.status = Set(PaymentStatus::Failed);
        pay.application_code = Set(event.application_code.clone());
        pay.raw = Set(payload);
        pay.updated_at = Set(Utc::now());
        pay.update(&txn).await?;

        let mut order: order::ActiveModel = order.into();
        order.transaction_status = Set(TransactionStatus::Failed);
        order.updated_at = Set(Utc::now());
        order.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentFailed(order_id))
            .await;
        warn!(order_id = %order_id, "Payment failed");

        self.notifier
            .dispatch_order_outcome(notices_from(event.cart_items), false);

        Ok(ReconciliationOutcome {
            order_id,
            payment_status: PaymentStatus::Failed,
        })
    }

    /// Records an abandoned checkout (the user closed the payment window).
    /// No notification is sent.
    #[instrument(skip(self, payload))]
    pub async fn mark_closed(
        &self,
        payload: serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let event: PaymentClosedEvent = serde_json::from_value(payload.clone())
            .map_err(|e| ServiceError::BadRequest(format!("Invalid payment event: {}", e)))?;
        let order_id = parse_order_code(&event.order_code)?;

        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id, &event.order_code).await?;
        let pay = find_latest_payment(&txn, order_id, &event.order_code).await?;

        let mut pay: payment::ActiveModel = pay.into();
        pay.status = Set(PaymentStatus::Failed);
        pay.event = Set(Some(event.event.clone()));
        pay.raw = Set(payload);
        pay.updated_at = Set(Utc::now());
        pay.update(&txn).await?;

        let mut order: order::ActiveModel = order.into();
        order.transaction_status = Set(TransactionStatus::Failed);
        order.updated_at = Set(Utc::now());
        order.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentAbandoned(order_id))
            .await;
        info!(order_id = %order_id, event = %event.event, "Checkout abandoned");

        Ok(ReconciliationOutcome {
            order_id,
            payment_status: PaymentStatus::Failed,
        })
    }

    /// Builds the checkout SDK bootstrap config for an order.
    #[instrument(skip(self))]
    pub async fn get_config(&self, order_id: Uuid) -> Result<PaymentProviderSession, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let parent = Parent::find_by_id(order.parent_id)
            .one(&*self.db)
            .await?
            .filter(|p| !p.parent_name.is_empty())
            .ok_or_else(|| ServiceError::NotFound("Parent details not found".to_string()))?;

        let first_item = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("No student USID found for this parent".to_string())
            })?;

        let student = Student::find_by_id(first_item.student_id)
            .one(&*self.db)
            .await?
            .filter(|s| !s.usid.is_empty())
            .ok_or_else(|| {
                ServiceError::NotFound("No student USID found for this parent".to_string())
            })?;

        Ok(PaymentProviderSession {
            env: self.provider.env.clone(),
            auth: ProviderAuth {
                client_id: self.provider.client_id.clone(),
                client_secret: self.provider.client_secret.clone(),
                api_key: self.provider.api_key.clone(),
            },
            student_id: student.usid.clone(),
            reference_id: order_id,
            student_details: StudentDetails {
                student_first_name: student.student_name,
            },
            customer_details: CustomerDetails {
                customer_first_name: parent.parent_name,
                customer_email: format!(
                    "{}@{}",
                    student.usid, self.provider.customer_email_domain
                ),
            },
            fee_headers: FeeHeaders {
                current_payable: order.total_price,
            },
            pp_config: SdkConfig {
                slug: self.provider.sdk_slug.clone(),
            },
        })
    }

    /// Latest payment for an order, with its raw audit payload.
    #[instrument(skip(self))]
    pub async fn get_payment_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        latest_payment(&*self.db, order_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Payment for order {} not found", order_id))
        })
    }
}

fn parse_event(payload: &serde_json::Value) -> Result<PaymentEvent, ServiceError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ServiceError::BadRequest(format!("Invalid payment event: {}", e)))
}

/// The order code on the wire is the order's primary identifier; anything
/// unparseable cannot reference a known order.
fn parse_order_code(order_code: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(order_code).map_err(|_| {
        ServiceError::NotFound(format!("Payment for order {} not found", order_code))
    })
}

async fn find_order<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    order_code: &str,
) -> Result<order::Model, ServiceError> {
    Order::find_by_id(order_id).one(conn).await?.ok_or_else(|| {
        ServiceError::NotFound(format!("Payment for order {} not found", order_code))
    })
}

async fn find_latest_payment<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    order_code: &str,
) -> Result<payment::Model, ServiceError> {
    latest_payment(conn, order_id).await?.ok_or_else(|| {
        ServiceError::NotFound(format!("Payment for order {} not found", order_code))
    })
}

fn notices_from(cart_items: Option<Vec<PaymentEventCartItem>>) -> Vec<OrderOutcomeNotice> {
    cart_items
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let student = item.student?;
            let usid = student.usid?;
            Some(OrderOutcomeNotice {
                usid,
                student_name: student.student_name.unwrap_or_default(),
            })
        })
        .collect()
}

/// Gateway payment event. Unknown fields are preserved through `extra` so
/// the raw column can keep everything the provider sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PaymentEventError>,
    #[serde(
        default,
        rename = "cartItems",
        skip_serializing_if = "Option::is_none"
    )]
    pub cart_items: Option<Vec<PaymentEventCartItem>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventCartItem {
    #[serde(default)]
    pub student: Option<PaymentEventStudent>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventStudent {
    #[serde(default)]
    pub usid: Option<String>,
    #[serde(default, alias = "studentName")]
    pub student_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Abandoned-checkout event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentClosedEvent {
    pub order_code: String,
    pub event: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationOutcome {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
}

/// Checkout SDK bootstrap payload
#[derive(Debug, Serialize)]
pub struct PaymentProviderSession {
    pub env: String,
    pub auth: ProviderAuth,
    pub student_id: String,
    pub reference_id: Uuid,
    pub student_details: StudentDetails,
    pub customer_details: CustomerDetails,
    pub fee_headers: FeeHeaders,
    pub pp_config: SdkConfig,
}

#[derive(Debug, Serialize)]
pub struct ProviderAuth {
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct StudentDetails {
    pub student_first_name: String,
}

#[derive(Debug, Serialize)]
pub struct CustomerDetails {
    pub customer_first_name: String,
    pub customer_email: String,
}

#[derive(Debug, Serialize)]
pub struct FeeHeaders {
    pub current_payable: Decimal,
}

#[derive(Debug, Serialize)]
pub struct SdkConfig {
    pub slug: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn payment_event_keeps_unknown_fields() {
        let payload = serde_json::json!({
            "order_code": "5f2e8f43-1fb0-4c06-a56e-12d4e5a6b7c8",
            "bank_reference_id": "BRN-42",
            "gateway_batch": "B-77"
        });

        let event: PaymentEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.bank_reference_id.as_deref(), Some("BRN-42"));
        assert_eq!(
            event.extra.get("gateway_batch").and_then(|v| v.as_str()),
            Some("B-77")
        );
    }

    #[test]
    fn payment_event_reads_camel_case_cart_items() {
        let payload = serde_json::json!({
            "order_code": "5f2e8f43-1fb0-4c06-a56e-12d4e5a6b7c8",
            "cartItems": [
                { "student": { "usid": "USID-001", "studentName": "Asha" } },
                { "student": null },
                {}
            ]
        });

        let event: PaymentEvent = serde_json::from_value(payload).unwrap();
        let notices = notices_from(event.cart_items);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].usid, "USID-001");
        assert_eq!(notices[0].student_name, "Asha");
    }

    #[test]
    fn unparseable_order_code_is_not_found() {
        let err = parse_order_code("not-a-uuid").unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    #[test]
    fn closed_event_requires_event_type() {
        let payload = serde_json::json!({
            "order_code": "5f2e8f43-1fb0-4c06-a56e-12d4e5a6b7c8"
        });
        let parsed: Result<PaymentClosedEvent, _> = serde_json::from_value(payload);
        assert!(parsed.is_err());
    }
}
