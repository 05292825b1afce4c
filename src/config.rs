use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_QUEUE_BACKEND: &str = "in-memory";
const DEFAULT_QUEUE_NAMESPACE: &str = "salestracker:alerts";
const DEFAULT_QUEUE_BATCH_SIZE: u32 = 5;
const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_QUEUE_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_QUEUE_BACKOFF_SECS: u64 = 30;

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (cache, and queue when backend = "redis")
    pub redis_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// TTL for the cached product listing, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Queue backend for low-stock alerts: "redis" or "in-memory"
    #[serde(default = "default_queue_backend")]
    pub queue_backend: String,

    /// Key prefix for the redis-backed queue
    #[serde(default = "default_queue_namespace")]
    pub queue_namespace: String,

    /// Messages fetched per consumer polling cycle
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: u32,

    /// How long a received message stays invisible to other consumers
    #[serde(default = "default_queue_visibility_timeout_secs")]
    pub queue_visibility_timeout_secs: u64,

    /// Delay between polling cycles after a normal cycle
    #[serde(default = "default_queue_poll_interval_secs")]
    pub queue_poll_interval_secs: u64,

    /// Delay before retrying after a cycle-level queue failure
    #[serde(default = "default_queue_backoff_secs")]
    pub queue_backoff_secs: u64,

    /// Webhook URL notifications are delivered to; unset disables delivery
    #[serde(default)]
    pub notification_webhook_url: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}
fn default_queue_backend() -> String {
    DEFAULT_QUEUE_BACKEND.to_string()
}
fn default_queue_namespace() -> String {
    DEFAULT_QUEUE_NAMESPACE.to_string()
}
fn default_queue_batch_size() -> u32 {
    DEFAULT_QUEUE_BATCH_SIZE
}
fn default_queue_visibility_timeout_secs() -> u64 {
    DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS
}
fn default_queue_poll_interval_secs() -> u64 {
    DEFAULT_QUEUE_POLL_INTERVAL_SECS
}
fn default_queue_backoff_secs() -> u64 {
    DEFAULT_QUEUE_BACKOFF_SECS
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration from `config/default.toml`, an optional
/// environment-specific file, and `APP_*` environment variables, in
/// increasing precedence.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .add_source(File::from(Path::new(CONFIG_DIR).join("default.toml")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(format!("{run_env}.toml"))).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    // Plain DATABASE_URL / REDIS_URL beat the file but lose to APP_* vars
    if let Ok(url) = std::env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }
    if let Ok(url) = std::env::var("REDIS_URL") {
        builder = builder.set_override("redis_url", url)?;
    }

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("Invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cache_ttl_secs: default_cache_ttl_secs(),
            queue_backend: default_queue_backend(),
            queue_namespace: default_queue_namespace(),
            queue_batch_size: default_queue_batch_size(),
            queue_visibility_timeout_secs: default_queue_visibility_timeout_secs(),
            queue_poll_interval_secs: default_queue_poll_interval_secs(),
            queue_backoff_secs: default_queue_backoff_secs(),
            notification_webhook_url: None,
        }
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let cfg = base_config();
        assert_eq!(cfg.listen_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn defaults_match_queue_contract() {
        let cfg = base_config();
        assert_eq!(cfg.queue_batch_size, 5);
        assert_eq!(cfg.queue_visibility_timeout_secs, 30);
        assert_eq!(cfg.queue_poll_interval_secs, 10);
        assert_eq!(cfg.queue_backoff_secs, 30);
        assert_eq!(cfg.cache_ttl_secs, 300);
    }
}
