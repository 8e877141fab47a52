use crate::{
    db::DbPool,
    entities::{
        bundle::{self, Gender, StudentType},
        bundle_product, product, Bundle, BundleProduct, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Catalog service for priced uniform bundles.
#[derive(Clone)]
pub struct BundleService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl BundleService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a bundle and its product lines in one transaction.
    ///
    /// Every referenced product must already exist; otherwise the whole
    /// creation is rejected with a bad-request error.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_bundle(
        &self,
        input: CreateBundleInput,
    ) -> Result<BundleWithProducts, ServiceError> {
        let txn = self.db.begin().await?;

        let mut product_ids: Vec<i64> = input.products.iter().map(|p| p.product_id).collect();
        product_ids.sort_unstable();
        product_ids.dedup();

        let existing = Product::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .all(&txn)
            .await?;
        if existing.len() != product_ids.len() {
            return Err(ServiceError::BadRequest(
                "One or more products not found".to_string(),
            ));
        }

        let now = Utc::now();
        let saved = bundle::ActiveModel {
            name: Set(input.name),
            gender: Set(input.gender),
            student_type: Set(input.student_type),
            applicable_classes: Set(serde_json::json!(input.applicable_classes)),
            total_price: Set(input.total_price),
            image: Set(input.image),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for line in &input.products {
            bundle_product::ActiveModel {
                bundle_id: Set(saved.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                optional: Set(line.optional),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::BundleCreated(saved.id))
            .await;
        info!("Created bundle {}", saved.id);

        self.get_bundle(saved.id).await
    }

    /// Retrieves a bundle with its product lines.
    #[instrument(skip(self))]
    pub async fn get_bundle(&self, id: i64) -> Result<BundleWithProducts, ServiceError> {
        let bundle = Bundle::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Bundle with ID {} not found", id)))?;

        let mut loaded = load_product_lines(&self.db, vec![bundle]).await?;
        Ok(loaded.remove(0))
    }

    /// Lists all bundles with their product lines.
    pub async fn list_bundles(&self) -> Result<Vec<BundleWithProducts>, ServiceError> {
        let bundles = Bundle::find()
            .order_by_asc(bundle::Column::Id)
            .all(&*self.db)
            .await?;

        load_product_lines(&self.db, bundles).await
    }
}

async fn load_product_lines(
    db: &DbPool,
    bundles: Vec<bundle::Model>,
) -> Result<Vec<BundleWithProducts>, ServiceError> {
    if bundles.is_empty() {
        return Ok(vec![]);
    }

    let bundle_ids: Vec<i64> = bundles.iter().map(|b| b.id).collect();
    let lines = BundleProduct::find()
        .filter(bundle_product::Column::BundleId.is_in(bundle_ids))
        .order_by_asc(bundle_product::Column::Id)
        .all(db)
        .await?;

    let product_ids: Vec<i64> = lines.iter().map(|l| l.product_id).collect();
    let products: HashMap<i64, product::Model> = Product::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut lines_by_bundle: HashMap<i64, Vec<BundleProductLine>> = HashMap::new();
    for line in lines {
        let product = products.get(&line.product_id).cloned().ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", line.product_id))
        })?;
        lines_by_bundle
            .entry(line.bundle_id)
            .or_default()
            .push(BundleProductLine { line, product });
    }

    Ok(bundles
        .into_iter()
        .map(|bundle| {
            let products = lines_by_bundle.remove(&bundle.id).unwrap_or_default();
            BundleWithProducts { bundle, products }
        })
        .collect())
}

/// Input for creating a bundle
#[derive(Debug, Deserialize)]
pub struct CreateBundleInput {
    pub name: String,
    pub gender: Gender,
    pub student_type: StudentType,
    #[serde(default)]
    pub applicable_classes: Vec<String>,
    pub total_price: Decimal,
    pub image: Option<String>,
    pub products: Vec<BundleProductInput>,
}

#[derive(Debug, Deserialize)]
pub struct BundleProductInput {
    pub product_id: i64,
    pub quantity: i32,
    #[serde(default)]
    pub optional: bool,
}

/// Bundle with its product lines
#[derive(Debug, Serialize)]
pub struct BundleWithProducts {
    pub bundle: bundle::Model,
    pub products: Vec<BundleProductLine>,
}

#[derive(Debug, Serialize)]
pub struct BundleProductLine {
    pub line: bundle_product::Model,
    pub product: product::Model,
}
