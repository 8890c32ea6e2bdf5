use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub preferences: PreferenceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery executors
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Capacity of the in-process delivery job channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceConfig {
    /// TTL for the policy and role-default caches in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// When false, the service runs on in-memory backends
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost:5432/courier".to_string()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base_url: String,
    #[serde(default)]
    pub bot_token: String,
    /// Transport timeout in seconds; a timed-out send is a transient failure
    #[serde(default = "default_telegram_timeout")]
    pub timeout_seconds: u64,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout() -> u64 {
    10
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("delivery.worker_concurrency", 5)?
            .set_default("delivery.queue_capacity", 1024)?
            .set_default("preferences.cache_ttl_seconds", 300)?
            .set_default("database.enabled", false)?
            .set_default("telegram.api_base_url", "https://api.telegram.org")?
            .set_default("telegram.timeout_seconds", 10)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // DELIVERY_WORKER_CONCURRENCY, DATABASE_URL, TELEGRAM_BOT_TOKEN, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_telegram_api_base(),
            bot_token: String::new(),
            timeout_seconds: default_telegram_timeout(),
        }
    }
}
