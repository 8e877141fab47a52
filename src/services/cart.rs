use crate::{
    db::DbPool,
    entities::{bundle, cart, cart_item, student, Bundle, Cart, CartItem, Student},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

/// Cart service managing the per-parent pre-purchase basket.
///
/// A cart is created lazily on the first add and holds one line per
/// (bundle, student) pair; re-adding the same pair overwrites the quantity
/// instead of duplicating the line.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds a bundle for a student to the parent's cart, creating the cart if
    /// needed. The line price snapshots the bundle price at add time.
    #[instrument(skip(self, input), fields(parent_id = %input.parent_id, bundle_id = %input.bundle_id))]
    pub async fn add_bundle_to_cart(
        &self,
        input: AddBundleToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let bundle = Bundle::find_by_id(input.bundle_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Bundle with ID {} not found", input.bundle_id))
            })?;

        Student::find_by_id(input.student_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Student not found".to_string()))?;

        let now = Utc::now();
        let cart = match Cart::find()
            .filter(cart::Column::ParentId.eq(input.parent_id))
            .one(&txn)
            .await?
        {
            Some(cart) => cart,
            None => {
                cart::ActiveModel {
                    parent_id: Set(input.parent_id),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            }
        };

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::BundleId.eq(input.bundle_id))
            .filter(cart_item::Column::StudentId.eq(input.student_id))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                // Same bundle for the same student: overwrite the quantity
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(input.quantity);
                item.updated_at = Set(now);
                item.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    cart_id: Set(cart.id),
                    bundle_id: Set(input.bundle_id),
                    student_id: Set(input.student_id),
                    quantity: Set(input.quantity),
                    price: Set(bundle.total_price),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        let items = load_cart_lines(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                bundle_id: input.bundle_id,
                student_id: input.student_id,
            })
            .await;

        info!(
            "Added bundle {} x{} for student {} to cart {}",
            input.bundle_id, input.quantity, input.student_id, cart.id
        );
        Ok(CartWithItems { cart, items })
    }

    /// Retrieves the parent's cart with bundles and students loaded.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, parent_id: i64) -> Result<CartWithItems, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::ParentId.eq(parent_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart not found for parent {}", parent_id))
            })?;

        let items = load_cart_lines(&*self.db, cart.id).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Removes every line carrying the given bundle from the parent's cart.
    #[instrument(skip(self))]
    pub async fn remove_from_cart(
        &self,
        parent_id: i64,
        bundle_id: i64,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::ParentId.eq(parent_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart not found for parent {}", parent_id))
            })?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::BundleId.eq(bundle_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Bundle with ID {} not found in cart", bundle_id))
            })?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;

        let items = load_cart_lines(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                bundle_id,
            })
            .await;

        Ok(CartWithItems { cart, items })
    }
}

/// Deletes all cart items belonging to the parent's cart.
///
/// A missing cart counts as already cleared; payment reconciliation may run
/// more than once for the same order and must not fail here.
pub(crate) async fn clear_items_for_parent<C: ConnectionTrait>(
    conn: &C,
    parent_id: i64,
) -> Result<u64, ServiceError> {
    match Cart::find()
        .filter(cart::Column::ParentId.eq(parent_id))
        .one(conn)
        .await?
    {
        Some(cart) => {
            let result = CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(conn)
                .await?;
            Ok(result.rows_affected)
        }
        None => Ok(0),
    }
}

/// Loads the cart's lines with their bundles and students in three reads.
pub(crate) async fn load_cart_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: i64,
) -> Result<Vec<CartLine>, ServiceError> {
    let items = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::Id)
        .all(conn)
        .await?;

    if items.is_empty() {
        return Ok(vec![]);
    }

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

    items
        .into_iter()
        .map(|item| {
            let bundle = bundles.get(&item.bundle_id).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!("Bundle with ID {} not found", item.bundle_id))
            })?;
            let student = students
                .get(&item.student_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound("Student not found".to_string()))?;
            Ok(CartLine {
                item,
                bundle,
                student,
            })
        })
        .collect()
}

/// Input for adding a bundle to a cart
#[derive(Debug, Deserialize, Validate)]
pub struct AddBundleToCartInput {
    pub parent_id: i64,
    pub bundle_id: i64,
    pub student_id: i64,
    #[validate(range(min = 1))]
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// One cart line with its bundle and student loaded
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item: cart_item::Model,
    pub bundle: bundle::Model,
    pub student: student::Model,
}

/// Cart with items
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<CartLine>,
}
