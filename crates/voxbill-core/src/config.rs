//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub billing: BillingConfig,
    pub slots: SlotConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Default TTL for cached items in seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Overdraft permitted on debits, in pence
    #[serde(default = "default_overdraft")]
    pub overdraft_pence: i64,

    /// Low-balance threshold assigned to new wallets, in pence
    #[serde(default = "default_low_balance_threshold")]
    pub low_balance_threshold_pence: i64,

    /// Open reservations older than this are auto-released
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: i64,

    /// Idempotency records are dropped after this window
    #[serde(default = "default_idempotency_retention")]
    pub idempotency_retention_secs: i64,

    /// Pending saga steps older than this are auto-refunded
    #[serde(default = "default_saga_timeout")]
    pub saga_recovery_timeout_secs: i64,

    /// Interval between background sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// TTL for cached balance snapshots on the kill-switch path
    #[serde(default = "default_balance_cache_ttl")]
    pub balance_cache_ttl_secs: u64,
}

fn default_overdraft() -> i64 {
    0
}

fn default_low_balance_threshold() -> i64 {
    500
}

fn default_reservation_ttl() -> i64 {
    2700 // 45 minutes
}

fn default_idempotency_retention() -> i64 {
    86400 // 24 hours
}

fn default_saga_timeout() -> i64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_balance_cache_ttl() -> u64 {
    5
}

/// Slot-locking configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SlotConfig {
    /// Width of a lock bucket in seconds
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: i64,

    /// How long a reserve call waits for a contended lock before `Busy`
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

fn default_bucket_secs() -> i64 {
    3600
}

fn default_lock_wait_ms() -> u64 {
    250
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("redis.default_ttl_secs", 300)?
            .set_default("billing.overdraft_pence", 0)?
            .set_default("billing.low_balance_threshold_pence", 500)?
            .set_default("billing.reservation_ttl_secs", 2700)?
            .set_default("billing.idempotency_retention_secs", 86400)?
            .set_default("billing.saga_recovery_timeout_secs", 300)?
            .set_default("billing.sweep_interval_secs", 60)?
            .set_default("billing.balance_cache_ttl_secs", 5)?
            .set_default("slots.bucket_secs", 3600)?
            .set_default("slots.lock_wait_ms", 250)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with VOXBILL_ prefix
            .add_source(
                Environment::with_prefix("VOXBILL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("VOXBILL").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            overdraft_pence: 0,
            low_balance_threshold_pence: 500,
            reservation_ttl_secs: 2700,
            idempotency_retention_secs: 86400,
            saga_recovery_timeout_secs: 300,
            sweep_interval_secs: 60,
            balance_cache_ttl_secs: 5,
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            bucket_secs: 3600,
            lock_wait_ms: 250,
        }
    }
}
