pub mod bundles;
pub mod cart;
pub mod orders;
pub mod payments;
pub mod settings;

pub use bundles::BundleService;
pub use cart::CartService;
pub use orders::OrderService;
pub use payments::PaymentService;
pub use settings::SettingsService;
