#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, Schema, Set};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uniform_store_api::{
    config::AppConfig,
    db::{establish_connection_with_config, DbConfig},
    entities::{
        self, bundle,
        bundle::{Gender, StudentType},
        order,
        order::{OrderStatus, SettlementStatus, TransactionStatus},
        parent, payment,
        payment::{PaymentMethod, PaymentStatus},
        product, settings, student,
    },
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};
use uuid::Uuid;

/// Helper harness backing tests with an in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Test application whose SMS gateway points at the given base URL.
    pub async fn with_sms_base_url(base_url: &str) -> Self {
        let mut cfg = test_config();
        cfg.sms.base_url = base_url.to_string();
        cfg.sms.api_key = "test-key".to_string();
        Self::with_config(cfg).await
    }

    async fn with_config(cfg: AppConfig) -> Self {
        // A single connection keeps the in-memory database alive and shared.
        let db_cfg = DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let db = establish_connection_with_config(&db_cfg)
            .await
            .expect("failed to create test database");
        setup_schema(&db).await;

        let db = Arc::new(db);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db.clone(), Arc::new(event_sender.clone()), &cfg);
        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            state,
            _event_task: event_task,
        }
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        environment: "test".to_string(),
        admin_security_code: "1234".to_string(),
        ..AppConfig::default()
    }
}

async fn setup_schema(db: &DatabaseConnection) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(entities::Parent),
        schema.create_table_from_entity(entities::Student),
        schema.create_table_from_entity(entities::Product),
        schema.create_table_from_entity(entities::Bundle),
        schema.create_table_from_entity(entities::BundleProduct),
        schema.create_table_from_entity(entities::Cart),
        schema.create_table_from_entity(entities::CartItem),
        schema.create_table_from_entity(entities::Order),
        schema.create_table_from_entity(entities::OrderItem),
        schema.create_table_from_entity(entities::Payment),
        schema.create_table_from_entity(entities::Settings),
    ];

    for stmt in &mut statements {
        db.execute(backend.build(stmt.if_not_exists()))
            .await
            .expect("failed to create table");
    }
}

pub async fn seed_settings(app: &TestApp, enable_purchasing: bool) -> settings::Model {
    let now = Utc::now();
    settings::ActiveModel {
        id: Set(Uuid::new_v4()),
        enable_individual_products: Set(true),
        enable_bulk_products: Set(true),
        enable_purchasing: Set(enable_purchasing),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed settings")
}

pub async fn seed_parent(
    app: &TestApp,
    name: &str,
    phone: &str,
    student_usids: &[&str],
) -> parent::Model {
    let now = Utc::now();
    parent::ActiveModel {
        parent_name: Set(name.to_string()),
        phone_number: Set(phone.to_string()),
        email: Set(None),
        address: Set(None),
        students: Set(serde_json::json!(student_usids)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed parent")
}

pub async fn seed_student(app: &TestApp, usid: &str, name: &str) -> student::Model {
    let now = Utc::now();
    student::ActiveModel {
        usid: Set(usid.to_string()),
        student_name: Set(name.to_string()),
        gender: Set(None),
        class_name: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed student")
}

pub async fn seed_product(app: &TestApp, name: &str, price: Decimal) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        name: Set(name.to_string()),
        price: Set(price),
        image: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed product")
}

pub async fn seed_bundle(app: &TestApp, name: &str, total_price: Decimal) -> bundle::Model {
    let now = Utc::now();
    bundle::ActiveModel {
        name: Set(name.to_string()),
        gender: Set(Gender::Unisex),
        student_type: Set(StudentType::New),
        applicable_classes: Set(serde_json::json!(["I", "II"])),
        total_price: Set(total_price),
        image: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed bundle")
}

pub async fn seed_order(app: &TestApp, parent_id: i64, total_price: Decimal) -> order::Model {
    let now = Utc::now();
    order::ActiveModel {
        id: Set(Uuid::new_v4()),
        parent_id: Set(parent_id),
        total_price: Set(total_price),
        status: Set(OrderStatus::InProgress),
        transaction_status: Set(TransactionStatus::Failed),
        settlement_status: Set(SettlementStatus::Pending),
        shipping_method: Set("school".to_string()),
        delivery_address: Set(None),
        is_address_edited: Set(false),
        tracking_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed order")
}

pub async fn seed_payment(app: &TestApp, order_id: Uuid, amount: Decimal) -> payment::Model {
    let now = Utc::now();
    payment::ActiveModel {
        order_id: Set(order_id),
        method: Set(PaymentMethod::Direct),
        status: Set(PaymentStatus::Failed),
        amount: Set(amount),
        external_reference: Set(None),
        application_code: Set(None),
        event: Set(None),
        raw: Set(serde_json::json!({})),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed payment")
}

/// Polls until `check` passes or the timeout elapses. Used for asserting on
/// fire-and-forget side effects.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
