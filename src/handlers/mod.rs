pub mod bundles;
pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;
pub mod settings;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::{PaymentNotifier, SmsClient};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub settings: Arc<crate::services::SettingsService>,
    pub bundles: Arc<crate::services::BundleService>,
    pub cart: Arc<crate::services::CartService>,
    pub orders: Arc<crate::services::OrderService>,
    pub payments: Arc<crate::services::PaymentService>,
}

impl AppServices {
    /// Build the AppServices container from shared infrastructure.
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let settings = Arc::new(crate::services::SettingsService::new(
            db.clone(),
            event_sender.clone(),
            config.admin_credential(),
        ));
        let bundles = Arc::new(crate::services::BundleService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let cart = Arc::new(crate::services::CartService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(crate::services::OrderService::new(
            db.clone(),
            event_sender.clone(),
            settings.clone(),
        ));

        let sms = SmsClient::new(config.sms.clone());
        let notifier = PaymentNotifier::new(db.clone(), sms);
        let payments = Arc::new(crate::services::PaymentService::new(
            db,
            event_sender,
            notifier,
            config.payment_provider.clone(),
        ));

        Self {
            settings,
            bundles,
            cart,
            orders,
            payments,
        }
    }
}
