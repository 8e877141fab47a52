use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Shared admin secret used to gate settings mutations.
///
/// The comparison is constant-time over the supplied bytes so the gate does
/// not leak how much of a guess matched. An empty configured secret never
/// verifies.
#[derive(Clone)]
pub struct AdminCredential(String);

impl AdminCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn verify(&self, supplied: &str) -> bool {
        let secret = self.0.as_bytes();
        let supplied = supplied.as_bytes();
        if secret.is_empty() || secret.len() != supplied.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in secret.iter().zip(supplied) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminCredential(***)")
    }
}

/// Outbound SMS gateway settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    /// Gateway endpoint receiving GET requests
    pub base_url: String,
    /// Gateway API key; when empty, dispatch is skipped with a warning
    pub api_key: String,
    /// Registered sender id
    pub sender_id: String,
    /// Country prefix prepended to recipient numbers
    pub country_prefix: String,
    /// Gateway route selector
    pub route: String,
    /// Store name used in message templates
    pub store_name: String,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://sms.teleosms.com/api/mt/SendSMS".to_string(),
            api_key: String::new(),
            sender_id: "UNIFRM".to_string(),
            country_prefix: "91".to_string(),
            route: "2".to_string(),
            store_name: "The Uniform Store".to_string(),
        }
    }
}

/// Credentials handed to the payment provider's checkout SDK.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PaymentProviderConfig {
    pub env: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
    pub sdk_slug: String,
    /// Domain used to derive a synthetic customer email from a student USID
    pub customer_email_domain: String,
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "database_url must be set"))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    pub log_level: String,

    /// Log in JSON format (structured logging)
    pub log_json: bool,

    /// DB pool: max connections
    pub db_max_connections: u32,

    /// DB pool: min connections
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    pub db_connect_timeout_secs: u64,
    pub db_idle_timeout_secs: u64,
    pub db_acquire_timeout_secs: u64,

    /// Shared secret required by settings mutations
    pub admin_security_code: String,

    /// Outbound SMS gateway
    pub sms: SmsConfig,

    /// Payment provider SDK credentials
    pub payment_provider: PaymentProviderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            db_max_connections: 10,
            db_min_connections: 1,
            db_connect_timeout_secs: 30,
            db_idle_timeout_secs: 600,
            db_acquire_timeout_secs: 8,
            admin_security_code: String::new(),
            sms: SmsConfig::default(),
            payment_provider: PaymentProviderConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn admin_credential(&self) -> AdminCredential {
        AdminCredential::new(self.admin_security_code.clone())
    }
}

/// Load configuration from `config/{environment}` files merged with
/// `APP_`-prefixed environment variables (e.g. `APP_DATABASE_URL`,
/// `APP_SMS__API_KEY`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(cfg)
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
