use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

const KAKAO_DEFAULT_BASE_URL: &str = "https://open-api.kakaopay.com";
const NAVER_DEFAULT_BASE_URL: &str = "https://dev-pay.paygate.naver.com";
const NAVER_DEFAULT_REDIRECT_BASE_URL: &str = "https://test-pay.naver.com/payments/";
const TOSS_DEFAULT_BASE_URL: &str = "https://api.tosspayments.com";

/// KakaoPay merchant credentials
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct KakaoPayConfig {
    #[serde(default = "default_kakao_base_url")]
    pub base_url: String,
    /// Merchant (CID) identifier
    #[validate(length(min = 1))]
    pub cid: String,
    #[validate(length(min = 1))]
    pub secret_key: String,
}

/// NaverPay partner credentials
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NaverPayConfig {
    #[serde(default = "default_naver_base_url")]
    pub base_url: String,
    /// Buyer-facing payment page; the reserve id is appended to it
    #[serde(default = "default_naver_redirect_base_url")]
    pub redirect_base_url: String,
    #[validate(length(min = 1))]
    pub partner_id: String,
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub client_secret: String,
    #[validate(length(min = 1))]
    pub chain_id: String,
}

/// TossPayments secret key
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TossPayConfig {
    #[serde(default = "default_toss_base_url")]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub secret_key: String,
}

// Credentials must never reach the logs, so Debug is written by hand.
impl fmt::Debug for KakaoPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KakaoPayConfig")
            .field("base_url", &self.base_url)
            .field("cid", &self.cid)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for NaverPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NaverPayConfig")
            .field("base_url", &self.base_url)
            .field("redirect_base_url", &self.redirect_base_url)
            .field("partner_id", &self.partner_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl fmt::Debug for TossPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TossPayConfig")
            .field("base_url", &self.base_url)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Payment gateway configuration. A provider is registered only when its section is present.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    /// Upper bound for every outbound provider call
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(custom = "validate_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub kakao: Option<KakaoPayConfig>,

    #[serde(default)]
    #[validate]
    pub naver: Option<NaverPayConfig>,

    #[serde(default)]
    #[validate]
    pub toss: Option<TossPayConfig>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_secs: default_gateway_timeout_secs(),
            kakao: None,
            naver: None,
            toss: None,
        }
    }
}

impl PaymentsConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret used to verify bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Payment providers
    #[serde(default)]
    #[validate]
    pub payments: PaymentsConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("log_level", &self.log_level)
            .field("auto_migrate", &self.auto_migrate)
            .field("db_max_connections", &self.db_max_connections)
            .field("payments", &self.payments)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            payments: PaymentsConfig::default(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_kakao_base_url() -> String {
    KAKAO_DEFAULT_BASE_URL.to_string()
}

fn default_naver_base_url() -> String {
    NAVER_DEFAULT_BASE_URL.to_string()
}

fn default_naver_redirect_base_url() -> String {
    NAVER_DEFAULT_REDIRECT_BASE_URL.to_string()
}

fn default_toss_base_url() -> String {
    TOSS_DEFAULT_BASE_URL.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_gateway_timeout(secs: u64) -> Result<(), ValidationError> {
    if secs == 0 || secs > 120 {
        let mut err = ValidationError::new("gateway_timeout_secs");
        err.message = Some("gateway_timeout_secs must be between 1 and 120".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_orders={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret deliberately has no default
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_jwt_secret_that_is_comfortably_longer_than_32_chars".into(),
            "test".into(),
        )
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.jwt_secret = "short".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));
    }

    #[test]
    fn unbounded_gateway_timeout_is_rejected() {
        let mut cfg = base_config();
        cfg.payments.gateway_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        cfg.payments.gateway_timeout_secs = 30;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.payments.gateway_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn nested_provider_section_is_validated() {
        let mut cfg = base_config();
        cfg.payments.toss = Some(TossPayConfig {
            base_url: default_toss_base_url(),
            secret_key: String::new(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_provider_secrets() {
        let kakao = KakaoPayConfig {
            base_url: default_kakao_base_url(),
            cid: "TC0ONETIME".into(),
            secret_key: "DEV_SECRET_123".into(),
        };
        let rendered = format!("{:?}", kakao);
        assert!(rendered.contains("TC0ONETIME"));
        assert!(!rendered.contains("DEV_SECRET_123"));

        let cfg = base_config();
        assert!(!format!("{:?}", cfg).contains(&cfg.jwt_secret));
    }
}
