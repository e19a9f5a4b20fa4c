//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub execution_engine_url: String,
    pub execution_timeout_secs: u64,
    /// Hours between a test case change and the re-execution of affected students.
    pub reexecution_interval_hours: i64,
    pub max_attempts: u32,
    pub batch_size: u64,
    pub sweep_interval_secs: u64,
    pub worker_concurrency: usize,
    pub retry_backoff_ms: u64,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

/// Reads `key` and parses it, falling back to `default` when unset or malformed.
fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Numeric values that fail to parse fall back to their defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "scheduler".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "scheduler=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "scheduler.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH").unwrap_or_default(),
            execution_engine_url: env::var("EXECUTION_ENGINE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8001".into()),
            execution_timeout_secs: parsed_or("EXECUTION_TIMEOUT_SECS", 30),
            reexecution_interval_hours: parsed_or("TEST_CASE_REEXECUTION_INTERVAL", 3),
            max_attempts: parsed_or("TEST_CASE_REEXECUTION_MAX_ATTEMPTS", 3),
            batch_size: parsed_or("TEST_CASE_REEXECUTION_BATCH_SIZE", 50),
            sweep_interval_secs: parsed_or("SWEEP_INTERVAL_SECS", 3600),
            worker_concurrency: parsed_or("WORKER_CONCURRENCY", 4),
            retry_backoff_ms: parsed_or("RETRY_BACKOFF_MS", 1000),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            if let Ok(mut guard) = lock.write() {
                *guard = AppConfig::from_env();
            }
        }
    }

    /// Generic internal setter for any field in the config.
    ///
    /// Used by public per-field setter methods.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_execution_engine_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.execution_engine_url = value.into());
    }

    pub fn set_reexecution_interval_hours(value: i64) {
        AppConfig::set_field(|cfg| cfg.reexecution_interval_hours = value);
    }

    pub fn set_max_attempts(value: u32) {
        AppConfig::set_field(|cfg| cfg.max_attempts = value);
    }

    pub fn set_batch_size(value: u64) {
        AppConfig::set_field(|cfg| cfg.batch_size = value);
    }
}

// --- Free-function accessors ---

pub fn env() -> String {
    AppConfig::global().env.clone()
}

pub fn project_name() -> String {
    AppConfig::global().project_name.clone()
}

pub fn log_level() -> String {
    AppConfig::global().log_level.clone()
}

pub fn log_file() -> String {
    AppConfig::global().log_file.clone()
}

pub fn log_to_stdout() -> bool {
    AppConfig::global().log_to_stdout
}

pub fn database_path() -> String {
    AppConfig::global().database_path.clone()
}

pub fn execution_engine_url() -> String {
    AppConfig::global().execution_engine_url.clone()
}

pub fn execution_timeout_secs() -> u64 {
    AppConfig::global().execution_timeout_secs
}

pub fn reexecution_interval_hours() -> i64 {
    AppConfig::global().reexecution_interval_hours
}

pub fn max_attempts() -> u32 {
    AppConfig::global().max_attempts
}

pub fn batch_size() -> u64 {
    AppConfig::global().batch_size
}

pub fn sweep_interval_secs() -> u64 {
    AppConfig::global().sweep_interval_secs
}

pub fn worker_concurrency() -> usize {
    AppConfig::global().worker_concurrency
}

pub fn retry_backoff_ms() -> u64 {
    AppConfig::global().retry_backoff_ms
}
