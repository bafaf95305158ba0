use aerodesk_core::PoolConfig;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_initial_pool_size")]
    pub initial_pool_size: usize,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Absent means acquire fails fast when every connection is on loan
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,
}

fn default_initial_pool_size() -> usize { 5 }
fn default_max_pool_size() -> usize { 20 }
fn default_validation_timeout_ms() -> u64 { 1000 }

impl DatabaseConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            initial_size: self.initial_pool_size,
            max_size: self.max_pool_size,
            acquire_timeout: self.acquire_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `AERODESK__DATABASE__MAX_POOL_SIZE=40`
            .add_source(config::Environment::with_prefix("AERODESK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
