use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub notification: NotificationConfig,
    pub shipping: ShippingConfig,
    pub smtp: SmtpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Empty means run against the in-memory store (development only).
    pub postgres_url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub default_max_attempts: i32,
    pub backoff_base_seconds: u64,
    pub dispatch_interval_seconds: u64,
    pub dispatch_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingConfig {
    pub allow_multiple_providers_per_company: bool,
    pub carrier_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Start with default values
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(
                File::with_name(&format!(
                    "config/{}",
                    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into())
                ))
                .required(false),
            )
            // Add local config (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with PROCURA prefix
            .add_source(Environment::with_prefix("PROCURA").separator("__"));

        config.build()?.try_deserialize()
    }

    /// Loads layered configuration, falling back to defaults when no config
    /// files or env vars are present.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                timeout_seconds: 30,
            },
            database: DatabaseConfig {
                postgres_url: String::new(),
                max_connections: 10,
                connection_timeout_seconds: 30,
            },
            notification: NotificationConfig {
                default_max_attempts: 5,
                backoff_base_seconds: 60,
                dispatch_interval_seconds: 15,
                dispatch_batch_size: 50,
            },
            shipping: ShippingConfig {
                allow_multiple_providers_per_company: true,
                carrier_timeout_seconds: 30,
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 587,
                username: "procura".to_string(),
                password: "password".to_string(),
                from_address: "noreply@procura.io".to_string(),
                from_name: "Procura Procurement Portal".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "plain".to_string(),
                file_path: None,
            },
        }
    }
}
