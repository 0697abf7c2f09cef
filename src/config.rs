use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::storage_keys;

pub const DEFAULT_MAX_PENDING: usize = 5;
pub const DEFAULT_PENDING_TTL_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_APP_LOCK_TIMEOUT_SECS: f64 = 120.0;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(alias = "maxPending", default = "default_max_pending")]
    pub max_pending: usize,

    #[serde(alias = "pendingTtlSecs", default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: i64,

    #[serde(alias = "appLockTimeoutSecs", default = "default_app_lock_timeout_secs")]
    pub app_lock_timeout_secs: f64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// URI prefixes under which payment apps call back into this app.
    #[serde(alias = "callbackPrefixes", default = "default_callback_prefixes")]
    pub callback_prefixes: Vec<String>,

    /// URI prefixes recognized as inbound payment request links.
    #[serde(alias = "paymentLinkPrefixes", default = "default_payment_link_prefixes")]
    pub payment_link_prefixes: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            pending_ttl_secs: default_pending_ttl_secs(),
            app_lock_timeout_secs: default_app_lock_timeout_secs(),
            currency: default_currency(),
            callback_prefixes: default_callback_prefixes(),
            payment_link_prefixes: default_payment_link_prefixes(),
        }
    }
}

impl ReconcileConfig {
    pub fn pending_ttl_millis(&self) -> i64 {
        self.pending_ttl_secs * 1000
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(alias = "dbPath", default = "default_db_path")]
    pub db_path: String,
    #[serde(alias = "keyPrefix", default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_pending_ttl_secs() -> i64 {
    DEFAULT_PENDING_TTL_SECS
}

fn default_app_lock_timeout_secs() -> f64 {
    DEFAULT_APP_LOCK_TIMEOUT_SECS
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_callback_prefixes() -> Vec<String> {
    vec!["paytrack://".to_string()]
}

fn default_payment_link_prefixes() -> Vec<String> {
    vec!["upi://pay".to_string()]
}

fn default_db_path() -> String {
    "paytrack.redb".to_string()
}

fn default_key_prefix() -> String {
    storage_keys::DEFAULT_PREFIX.to_string()
}

fn default_port() -> u16 {
    3002
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            // 1. Global config from ~/.paytrack/config.*
            .add_source(File::with_name(&format!("{}/.paytrack/config", home)).required(false))
            // 2. Project config from config/config.*
            .add_source(File::with_name("config/config").required(false))
            // 3. Local overrides from config/local.* (not checked in)
            .add_source(File::with_name("config/local").required(false))
            // 4. Environment overrides, e.g. PAYTRACK_STORAGE__DB_PATH
            .add_source(Environment::with_prefix("PAYTRACK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
