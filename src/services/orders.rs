use crate::{
    db::DbPool,
    entities::{
        bundle, cart, order,
        order::{OrderStatus, SettlementStatus, TransactionStatus},
        order_item, payment,
        payment::{PaymentMethod, PaymentStatus},
        student, Bundle, Cart, Order, OrderItem, Payment, Student,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::cart::load_cart_lines,
    services::settings::SettingsService,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const SHIPPING_HOME: &str = "home";

/// Flat surcharge applied when the order is delivered to the home address.
fn home_delivery_surcharge() -> Decimal {
    Decimal::from(500)
}

/// Per-parent async mutexes serializing order placement.
///
/// Two concurrent placements for one parent would otherwise both read the
/// same cart snapshot before either commits and double-spend it; the row
/// isolation of the database alone does not prevent that.
#[derive(Clone, Default)]
pub struct PlacementLocks {
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl PlacementLocks {
    pub async fn acquire(&self, parent_id: i64) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(parent_id).or_default().clone();
        lock.lock_owned().await
    }
}

/// Order service: converts carts into orders and maintains order status.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    settings: Arc<SettingsService>,
    placement_locks: PlacementLocks,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
            placement_locks: PlacementLocks::default(),
        }
    }

    /// Places an order from the parent's cart.
    ///
    /// The settings gate is consulted before any transaction is opened; a
    /// disabled shop short-circuits without touching the database. Inside one
    /// transaction the cart is read, bundle prices are re-read fresh, and the
    /// order, its item snapshots, and a pending payment row are written. The
    /// cart itself survives until the gateway confirms payment so an
    /// abandoned checkout stays recoverable.
    #[instrument(skip(self, input), fields(parent_id = %input.parent_id))]
    pub async fn place_order_from_cart(
        &self,
        input: PlaceOrderInput,
    ) -> Result<OrderPlacement, ServiceError> {
        let settings = self.settings.get_settings().await?;
        if !settings.enable_purchasing {
            info!(
                "Purchasing disabled; rejecting placement for parent {}",
                input.parent_id
            );
            return Ok(OrderPlacement::PurchasingDisabled);
        }

        let _guard = self.placement_locks.acquire(input.parent_id).await;

        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::ParentId.eq(input.parent_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart not found for parent {}", input.parent_id))
            })?;

        let lines = load_cart_lines(&txn, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::NotFound("Cart is empty".to_string()));
        }

        // Prices come from the bundles as read inside this transaction, not
        // from the cart's add-time snapshot.
        let priced: Vec<(i32, Decimal)> = lines
            .iter()
            .map(|l| (l.item.quantity, l.bundle.total_price))
            .collect();
        let total = order_total(&priced, &input.shipping_method);

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let saved_order = order::ActiveModel {
            id: Set(order_id),
            parent_id: Set(input.parent_id),
            total_price: Set(total),
            status: Set(OrderStatus::InProgress),
            transaction_status: Set(TransactionStatus::Failed),
            settlement_status: Set(SettlementStatus::Pending),
            shipping_method: Set(input.shipping_method.clone()),
            delivery_address: Set(input.delivery_address.clone()),
            is_address_edited: Set(input.is_address_edited),
            tracking_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for line in &lines {
            order_item::ActiveModel {
                order_id: Set(order_id),
                bundle_id: Set(line.item.bundle_id),
                student_id: Set(line.item.student_id),
                quantity: Set(line.item.quantity),
                unit_price: Set(line.bundle.total_price),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }

        payment::ActiveModel {
            order_id: Set(order_id),
            method: Set(PaymentMethod::Direct),
            status: Set(PaymentStatus::Failed),
            amount: Set(total),
            external_reference: Set(None),
            application_code: Set(None),
            event: Set(None),
            raw: Set(serde_json::json!({})),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut details = load_order_details(&txn, vec![saved_order]).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderPlaced(order_id))
            .await;
        info!(order_id = %order_id, total = %total, "Order placed from cart");

        Ok(OrderPlacement::Placed(Box::new(details.remove(0))))
    }

    /// Lists all orders, newest first.
    #[instrument(skip(self))]
    pub async fn find_all(&self) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if orders.is_empty() {
            return Err(ServiceError::NotFound("No orders found".to_string()));
        }

        load_order_details(&*self.db, orders).await
    }

    /// Lists one parent's orders, newest first.
    #[instrument(skip(self))]
    pub async fn find_by_parent(&self, parent_id: i64) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::ParentId.eq(parent_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if orders.is_empty() {
            return Err(ServiceError::NotFound(
                "No orders found for this parent".to_string(),
            ));
        }

        load_order_details(&*self.db, orders).await
    }

    /// Updates the delivery status (and tracking id when provided).
    #[instrument(skip(self, input), fields(order_id = %order_id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        input: UpdateOrderStatusInput,
    ) -> Result<order::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order with ID {} not found", order_id))
            })?;

        let old_status = order.status;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(input.status);
        if let Some(tracking_id) = input.tracking_id {
            active.tracking_id = Set(Some(tracking_id));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", old_status),
                new_status: format!("{:?}", input.status),
            })
            .await;

        Ok(updated)
    }

    /// Updates the transaction and settlement status, mirroring the result
    /// onto the order's latest payment.
    #[instrument(skip(self, input), fields(order_id = %order_id))]
    pub async fn update_transaction_status(
        &self,
        order_id: Uuid,
        input: UpdateTransactionStatusInput,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order with ID {} not found", order_id))
            })?;

        let mut active: order::ActiveModel = order.into();
        active.transaction_status = Set(input.status);
        active.settlement_status = Set(input.settlement_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        if let Some(pay) = latest_payment(&txn, order_id).await? {
            let mut pay: payment::ActiveModel = pay.into();
            pay.status = Set(payment_status_for(input.status));
            if let Some(code) = input.application_code {
                pay.application_code = Set(Some(code));
            }
            pay.updated_at = Set(Utc::now());
            pay.update(&txn).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::TransactionStatusChanged {
                order_id,
                new_status: format!("{:?}", input.status),
            })
            .await;

        Ok(updated)
    }

    /// Applies delivery-status updates to many orders at once.
    ///
    /// Items referencing unknown orders fail individually without aborting
    /// the rest; the batch is intentionally not transactional across items.
    #[instrument(skip(self, input), fields(count = input.transactions.len()))]
    pub async fn bulk_update_status(
        &self,
        input: BulkUpdateOrderStatusInput,
    ) -> Result<BulkUpdateOutcome, ServiceError> {
        let ids: Vec<Uuid> = input.transactions.iter().map(|t| t.order_id).collect();
        let orders: HashMap<Uuid, order::Model> = Order::find()
            .filter(order::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();

        let mut outcome = BulkUpdateOutcome::default();
        for item in input.transactions {
            let Some(order) = orders.get(&item.order_id).cloned() else {
                outcome.record_failure(
                    item.order_id,
                    format!("Order with ID {} not found", item.order_id),
                );
                continue;
            };

            let mut active: order::ActiveModel = order.into();
            active.status = Set(item.status);
            if let Some(tracking_id) = item.tracking_id {
                active.tracking_id = Set(Some(tracking_id));
            }
            active.updated_at = Set(Utc::now());

            match active.update(&*self.db).await {
                Ok(_) => outcome.record_success(item.order_id),
                Err(e) => {
                    warn!(order_id = %item.order_id, "Bulk status update failed: {}", e);
                    outcome.record_failure(item.order_id, e.to_string());
                }
            }
        }

        Ok(outcome.finish())
    }

    /// Applies transaction/settlement updates to many orders at once,
    /// mirroring each result onto the order's latest payment.
    #[instrument(skip(self, input), fields(count = input.transactions.len()))]
    pub async fn bulk_update_transaction_status(
        &self,
        input: BulkUpdateTransactionStatusInput,
    ) -> Result<BulkUpdateOutcome, ServiceError> {
        let ids: Vec<Uuid> = input.transactions.iter().map(|t| t.order_id).collect();
        let orders: HashMap<Uuid, order::Model> = Order::find()
            .filter(order::Column::Id.is_in(ids.clone()))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();

        // Ascending creation order, so the map retains the latest payment per order.
        let payments: HashMap<Uuid, payment::Model> = Payment::find()
            .filter(payment::Column::OrderId.is_in(ids))
            .order_by_asc(payment::Column::CreatedAt)
            .order_by_asc(payment::Column::Id)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.order_id, p))
            .collect();

        let mut outcome = BulkUpdateOutcome::default();
        for item in input.transactions {
            let Some(order) = orders.get(&item.order_id).cloned() else {
                outcome.record_failure(
                    item.order_id,
                    format!("Order with ID {} not found", item.order_id),
                );
                continue;
            };

            let mut active: order::ActiveModel = order.into();
            active.transaction_status = Set(item.status);
            active.settlement_status = Set(item.settlement_status);
            active.updated_at = Set(Utc::now());

            if let Err(e) = active.update(&*self.db).await {
                warn!(order_id = %item.order_id, "Bulk transaction update failed: {}", e);
                outcome.record_failure(item.order_id, e.to_string());
                continue;
            }

            if let Some(pay) = payments.get(&item.order_id).cloned() {
                let mut pay: payment::ActiveModel = pay.into();
                pay.status = Set(payment_status_for(item.status));
                if let Some(code) = item.application_code {
                    pay.application_code = Set(Some(code));
                }
                pay.updated_at = Set(Utc::now());
                if let Err(e) = pay.update(&*self.db).await {
                    warn!(order_id = %item.order_id, "Payment mirror update failed: {}", e);
                }
            }

            outcome.record_success(item.order_id);
        }

        Ok(outcome.finish())
    }
}

/// Total payable for the given (quantity, unit price) lines and shipping
/// choice.
pub fn order_total(items: &[(i32, Decimal)], shipping_method: &str) -> Decimal {
    let subtotal: Decimal = items
        .iter()
        .map(|(quantity, unit_price)| Decimal::from(*quantity) * *unit_price)
        .sum();

    if shipping_method == SHIPPING_HOME {
        subtotal + home_delivery_surcharge()
    } else {
        subtotal
    }
}

fn payment_status_for(status: TransactionStatus) -> PaymentStatus {
    match status {
        TransactionStatus::Paid => PaymentStatus::Paid,
        TransactionStatus::Failed => PaymentStatus::Failed,
    }
}

/// Latest payment row for an order, by creation time.
pub(crate) async fn latest_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<payment::Model>, ServiceError> {
    Ok(Payment::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .order_by_desc(payment::Column::CreatedAt)
        .order_by_desc(payment::Column::Id)
        .one(conn)
        .await?)
}

/// Loads item snapshots (with bundles and students) and payments for a set
/// of orders, one read per table.
pub(crate) async fn load_order_details<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderDetails>, ServiceError> {
    if orders.is_empty() {
        return Ok(vec![]);
    }

    let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?;

    let bundle_ids: Vec<i64> = items.iter().map(|i| i.bundle_id).collect();
    let student_ids: Vec<i64> = items.iter().map(|i| i.student_id).collect();

    let bundles: HashMap<i64, bundle::Model> = Bundle::find()
        .filter(bundle::Column::Id.is_in(bundle_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|b| (b.id, b))
        .collect();

    let students: HashMap<i64, student::Model> = Student::find()
        .filter(student::Column::Id.is_in(student_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let payments = Payment::find()
        .filter(payment::Column::OrderId.is_in(order_ids))
        .order_by_asc(payment::Column::CreatedAt)
        .all(conn)
        .await?;

    let mut items_by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
    for item in items {
        let bundle = bundles.get(&item.bundle_id).cloned().ok_or_else(|| {
            ServiceError::NotFound(format!("Bundle with ID {} not found", item.bundle_id))
        })?;
        let student = students
            .get(&item.student_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Student not found".to_string()))?;
        items_by_order.entry(item.order_id).or_default().push(OrderLine {
            item,
            bundle,
            student,
        });
    }

    let mut payments_by_order: HashMap<Uuid, Vec<payment::Model>> = HashMap::new();
    for pay in payments {
        payments_by_order.entry(pay.order_id).or_default().push(pay);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = items_by_order.remove(&order.id).unwrap_or_default();
            let payments = payments_by_order.remove(&order.id).unwrap_or_default();
            OrderDetails {
                order,
                items,
                payments,
            }
        })
        .collect())
}

/// Input for placing an order from a cart
#[derive(Debug, Deserialize)]
pub struct PlaceOrderInput {
    pub parent_id: i64,
    pub shipping_method: String,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub is_address_edited: bool,
    pub delivery_address: Option<String>,
}

/// Outcome of a placement attempt
#[derive(Debug)]
pub enum OrderPlacement {
    Placed(Box<OrderDetails>),
    PurchasingDisabled,
}

/// Order with item snapshots and payments loaded
#[derive(Debug, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<OrderLine>,
    pub payments: Vec<payment::Model>,
}

#[derive(Debug, Serialize)]
pub struct OrderLine {
    pub item: order_item::Model,
    pub bundle: bundle::Model,
    pub student: student::Model,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusInput {
    pub status: OrderStatus,
    pub tracking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransactionStatusInput {
    pub status: TransactionStatus,
    pub settlement_status: SettlementStatus,
    pub application_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateOrderStatusInput {
    pub transactions: Vec<BulkOrderStatusItem>,
}

#[derive(Debug, Deserialize)]
pub struct BulkOrderStatusItem {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub tracking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateTransactionStatusInput {
    pub transactions: Vec<BulkTransactionItem>,
}

#[derive(Debug, Deserialize)]
pub struct BulkTransactionItem {
    pub order_id: Uuid,
    pub status: TransactionStatus,
    pub settlement_status: SettlementStatus,
    pub application_code: Option<String>,
}

/// Result of a bulk update; `success` is false only when every item failed.
#[derive(Debug, Default, Serialize)]
pub struct BulkUpdateOutcome {
    pub success: bool,
    pub updated: usize,
    pub failed: usize,
    pub results: Vec<BulkItemOutcome>,
}

#[derive(Debug, Serialize)]
pub struct BulkItemOutcome {
    pub order_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkUpdateOutcome {
    fn record_success(&mut self, order_id: Uuid) {
        self.updated += 1;
        self.results.push(BulkItemOutcome {
            order_id,
            success: true,
            error: None,
        });
    }

    fn record_failure(&mut self, order_id: Uuid, error: String) {
        self.failed += 1;
        self.results.push(BulkItemOutcome {
            order_id,
            success: false,
            error: Some(error),
        });
    }

    fn finish(mut self) -> Self {
        self.success = self.results.is_empty() || self.updated > 0;
        self
    }
}
